//! Spatial cluster/ray channel engine.
//!
//! Produces per-link realizations following the TR 38.901 step sequence
//! with the TR 37.885 V2V parameter tables: cluster delays and powers,
//! dominant and subray angles, per-element phase terms and the LOS specular
//! ray. Realizations are cached per directed link and refreshed when the
//! coherence window expires, the propagation condition flips, or an
//! endpoint moves beyond the displacement threshold.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::StandardNormal;

use crate::channel::antenna::AntennaArray;
use crate::channel::condition::ConditionResolver;
use crate::channel::params::{c_phi_nlos, c_theta_nlos, ParamsTable, ScenarioParams, RAY_OFFSET_ALPHA};
use crate::channel::pathloss::PathlossModel;
use crate::config::{Condition, Scenario, SimConfig};
use crate::error::Result;
use crate::scene::{Vec3, VehicleId};
use crate::sim::SimTime;

const SPEED_OF_LIGHT: f64 = 3.0e8;

/// One small-scale fading realization of a directed link.
#[derive(Debug, Clone)]
pub struct ChannelRealization {
    pub condition: Condition,
    /// Rician K factor in dB; only meaningful under LOS.
    pub k_factor_db: f64,
    /// Coefficients indexed `[rx_element][tx_element][cluster]`.
    pub coeffs: Vec<Vec<Vec<Complex64>>>,
    /// Cluster excess delays, seconds, ascending.
    pub delays_s: Vec<f64>,
    /// Cluster center angles, degrees.
    pub aoa_deg: Vec<f64>,
    pub zoa_deg: Vec<f64>,
    pub aod_deg: Vec<f64>,
    pub zod_deg: Vec<f64>,
}

impl ChannelRealization {
    pub fn num_clusters(&self) -> usize {
        self.delays_s.len()
    }
}

struct CachedChannel {
    realization: Arc<ChannelRealization>,
    expires_at: SimTime,
    tx_pos: Vec3,
    rx_pos: Vec3,
}

/// Kinematic state of one link endpoint pair at query time.
///
/// The aim points carry where each panel is actually steered: on a desired
/// link both panels point at their peer, while an interference path keeps
/// the interferer's beam on its own receiver and the victim's beam on its
/// desired transmitter.
#[derive(Debug, Clone, Copy)]
pub struct LinkState {
    pub tx: VehicleId,
    pub rx: VehicleId,
    pub tx_pos: Vec3,
    pub rx_pos: Vec3,
    pub tx_vel: Vec3,
    pub rx_vel: Vec3,
    /// Position the transmit panel is steered at.
    pub tx_aim: Vec3,
    /// Position the receive panel is steered at.
    pub rx_aim: Vec3,
}

impl LinkState {
    /// A link whose panels are steered at each other.
    pub fn aligned(
        tx: VehicleId,
        rx: VehicleId,
        tx_pos: Vec3,
        rx_pos: Vec3,
        tx_vel: Vec3,
        rx_vel: Vec3,
    ) -> Self {
        Self {
            tx,
            rx,
            tx_pos,
            rx_pos,
            tx_vel,
            rx_vel,
            tx_aim: rx_pos,
            rx_aim: tx_pos,
        }
    }
}

pub struct ChannelEngine {
    scenario: Scenario,
    fc_hz: f64,
    coherence_us: u64,
    displacement_threshold_m: f64,
    params: ParamsTable,
    resolver: ConditionResolver,
    pathloss: PathlossModel,
    array: AntennaArray,
    cache: HashMap<(VehicleId, VehicleId), CachedChannel>,
}

impl ChannelEngine {
    pub fn new(cfg: &SimConfig) -> Result<Self> {
        Ok(Self {
            scenario: cfg.channel.scenario,
            fc_hz: cfg.phy.center_frequency_hz,
            coherence_us: cfg.channel.coherence_interval_us,
            displacement_threshold_m: cfg.channel.displacement_threshold_m,
            params: ParamsTable::new(cfg.phy.center_frequency_hz),
            resolver: ConditionResolver::new(cfg.channel.scenario, cfg.channel.condition_mode),
            pathloss: PathlossModel::new(cfg.channel.scenario, cfg.phy.center_frequency_hz),
            array: AntennaArray::new(&cfg.antenna)?,
            cache: HashMap::new(),
        })
    }

    /// Per-subcarrier linear power gain of the link, combining large-scale
    /// loss, the beamformed small-scale channel, per-cluster Doppler and
    /// the per-subcarrier delay phase ramp.
    ///
    /// `subcarrier_freqs_hz` are absolute subcarrier center frequencies.
    pub fn link_gain(
        &mut self,
        link: &LinkState,
        now: SimTime,
        subcarrier_freqs_hz: &[f64],
        rng: &mut StdRng,
    ) -> Result<Vec<f64>> {
        let distance = link.tx_pos.distance(link.rx_pos);
        if distance <= 0.0 {
            return Ok(vec![1.0; subcarrier_freqs_hz.len()]);
        }

        let condition = self
            .resolver
            .resolve(link.tx, link.rx, distance, rng);
        let realization = self.realization(link, condition, now, rng)?;

        // Conjugate beamforming along each panel's own aim point, which on
        // an interference path is not the other end of this link.
        let (tx_zenith, tx_azimuth) = angles_toward(link.tx_pos, link.tx_aim);
        let (rx_zenith, rx_azimuth) = angles_toward(link.rx_pos, link.rx_aim);
        let w_tx = self.array.steering_vector(tx_zenith, tx_azimuth);
        let w_rx = self.array.steering_vector(rx_zenith, rx_azimuth);

        let long_term = beamform(&realization, &w_tx, &w_rx);
        let doppler = self.cluster_doppler(&realization, link, now, rng);

        let loss_db = self.pathloss.loss_db(
            link.tx,
            link.rx,
            link.tx_pos,
            link.rx_pos,
            condition,
            rng,
        );
        let loss_linear = 10f64.powf(-loss_db / 10.0);

        let gains = subcarrier_freqs_hz
            .iter()
            .map(|&f| {
                let mut subband = Complex64::new(0.0, 0.0);
                for (c, (lt, dop)) in long_term.iter().zip(&doppler).enumerate() {
                    let delay_phase = -2.0 * PI * f * realization.delays_s[c];
                    subband += lt * dop * Complex64::from_polar(1.0, delay_phase);
                }
                subband.norm_sqr() * loss_linear
            })
            .collect();
        Ok(gains)
    }

    /// The cached realization of the directed link, recomputed on expiry,
    /// condition flip or displacement beyond the threshold.
    fn realization(
        &mut self,
        link: &LinkState,
        condition: Condition,
        now: SimTime,
        rng: &mut StdRng,
    ) -> Result<Arc<ChannelRealization>> {
        let key = (link.tx, link.rx);
        if let Some(cached) = self.cache.get(&key) {
            let moved = cached
                .tx_pos
                .distance(link.tx_pos)
                .max(cached.rx_pos.distance(link.rx_pos));
            if now < cached.expires_at
                && cached.realization.condition == condition
                && moved < self.displacement_threshold_m
            {
                return Ok(cached.realization.clone());
            }
            log::debug!(
                "link {}->{}: regenerating channel (moved {:.2}m, condition {:?})",
                link.tx,
                link.rx,
                moved,
                condition
            );
        }

        let params = self.params.get(self.scenario, condition);
        let realization = Arc::new(generate_realization(
            &params,
            condition,
            &self.array,
            link,
            rng,
        ));
        log::debug!(
            "link {}->{}: {:?} realization, {} clusters, K {:.1} dB",
            link.tx,
            link.rx,
            realization.condition,
            realization.num_clusters(),
            realization.k_factor_db
        );
        self.cache.insert(
            key,
            CachedChannel {
                realization: realization.clone(),
                expires_at: now.offset(self.coherence_us),
                tx_pos: link.tx_pos,
                rx_pos: link.rx_pos,
            },
        );
        Ok(realization)
    }

    /// Per-cluster Doppler phasors at `now`. Delayed paths pick up an
    /// extra random scatterer term bounded by the scenario's maximum
    /// vehicle speed, per TR 37.885.
    fn cluster_doppler(
        &self,
        realization: &ChannelRealization,
        link: &LinkState,
        now: SimTime,
        rng: &mut StdRng,
    ) -> Vec<Complex64> {
        let v_scatt = match self.scenario {
            Scenario::V2vUrban => 60.0 / 3.6,
            Scenario::V2vHighway => 140.0 / 3.6,
        };
        let t = now.as_secs_f64();
        (0..realization.num_clusters())
            .map(|c| {
                let delayed_paths_term = if c == 0 {
                    0.0
                } else {
                    let d: f64 = rng.gen_range(-v_scatt..=v_scatt);
                    let alpha: f64 = rng.gen();
                    2.0 * alpha * d
                };
                let zoa = realization.zoa_deg[c].to_radians();
                let aoa = realization.aoa_deg[c].to_radians();
                let zod = realization.zod_deg[c].to_radians();
                let aod = realization.aod_deg[c].to_radians();
                let radial = zoa.sin() * aoa.cos() * link.rx_vel.x
                    + zoa.sin() * aoa.sin() * link.rx_vel.y
                    + zoa.cos() * link.rx_vel.z
                    + zod.sin() * aod.cos() * link.tx_vel.x
                    + zod.sin() * aod.sin() * link.tx_vel.y
                    + zod.cos() * link.tx_vel.z;
                let phase =
                    2.0 * PI * (radial + delayed_paths_term) * t * self.fc_hz / SPEED_OF_LIGHT;
                Complex64::from_polar(1.0, phase)
            })
            .collect()
    }

    /// Forget all per-link state of a vehicle, e.g. when it leaves the
    /// scene: fading realizations, condition draws and shadowing history.
    pub fn forget_vehicle(&mut self, id: VehicleId) {
        self.cache.retain(|key, _| key.0 != id && key.1 != id);
        self.resolver.forget_vehicle(id);
        self.pathloss.forget_vehicle(id);
    }
}

/// (zenith, azimuth) of the direction from `from` toward `to`.
fn angles_toward(from: Vec3, to: Vec3) -> (f64, f64) {
    let d = to.sub(from);
    let len = d.length();
    if len <= 0.0 {
        return (std::f64::consts::FRAC_PI_2, 0.0);
    }
    let zenith = (d.z / len).acos();
    let azimuth = d.y.atan2(d.x);
    (zenith, azimuth)
}

/// Combine the coefficient matrix through the tx/rx beamforming weights
/// into one long-term coefficient per cluster.
fn beamform(
    realization: &ChannelRealization,
    w_tx: &[Complex64],
    w_rx: &[Complex64],
) -> Vec<Complex64> {
    (0..realization.num_clusters())
        .map(|c| {
            let mut tx_sum = Complex64::new(0.0, 0.0);
            for (s, wt) in w_tx.iter().enumerate() {
                let mut rx_sum = Complex64::new(0.0, 0.0);
                for (u, wr) in w_rx.iter().enumerate() {
                    rx_sum += wr * realization.coeffs[u][s][c];
                }
                tx_sum += wt * rx_sum;
            }
            tx_sum
        })
        .collect()
}

fn generate_realization(
    params: &ScenarioParams,
    condition: Condition,
    array: &AntennaArray,
    link: &LinkState,
    rng: &mut StdRng,
) -> ChannelRealization {
    let n_clusters = params.num_clusters;
    let n_rays = params.rays_per_cluster;
    let normal = |rng: &mut StdRng| -> f64 { rng.sample(StandardNormal) };

    // Large-scale parameters, drawn independently.
    let k_factor_db = if condition == Condition::Los {
        normal(rng) * params.sigma_k + params.mu_k
    } else {
        0.0
    };
    let ds = 10f64.powf(normal(rng) * params.sigma_lg_ds + params.mu_lg_ds);
    let asd = 10f64
        .powf(normal(rng) * params.sigma_lg_asd + params.mu_lg_asd)
        .min(104.0);
    let asa = 10f64
        .powf(normal(rng) * params.sigma_lg_asa + params.mu_lg_asa)
        .min(104.0);
    let zsd = 10f64
        .powf(normal(rng) * params.sigma_lg_zsd + params.mu_lg_zsd)
        .min(52.0);
    let zsa = 10f64
        .powf(normal(rng) * params.sigma_lg_zsa + params.mu_lg_zsa)
        .min(52.0);

    // Cluster delays: exponential, min-subtracted, ascending.
    let mut delays: Vec<f64> = (0..n_clusters)
        .map(|_| {
            let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            -params.r_tau * ds * u.ln()
        })
        .collect();
    let min_delay = delays.iter().cloned().fold(f64::INFINITY, f64::min);
    for d in &mut delays {
        *d -= min_delay;
    }
    delays.sort_by(f64::total_cmp);

    // Cluster powers: exponential decay shadowed per cluster, unit sum.
    let mut powers: Vec<f64> = delays
        .iter()
        .map(|&tau| {
            let shadow_db = normal(rng) * params.per_cluster_shadowing_db;
            (-tau * (params.r_tau - 1.0) / (params.r_tau * ds)).exp()
                * 10f64.powf(-shadow_db / 10.0)
        })
        .collect();
    let power_sum: f64 = powers.iter().sum();
    for p in &mut powers {
        *p /= power_sum;
    }

    // Powers used for angle generation put the specular energy into the
    // first cluster under LOS.
    let k_linear = 10f64.powf(k_factor_db / 10.0);
    let powers_for_angles: Vec<f64> = if condition == Condition::Los {
        powers
            .iter()
            .enumerate()
            .map(|(c, &p)| {
                let diffuse = p / (1.0 + k_linear);
                if c == 0 {
                    diffuse + k_linear / (1.0 + k_linear)
                } else {
                    diffuse
                }
            })
            .collect()
    } else {
        powers.clone()
    };
    let power_max = powers_for_angles
        .iter()
        .cloned()
        .fold(0.0f64, f64::max);

    // Prune clusters 25 dB below the strongest.
    let threshold = 0.0032 * power_max;
    let keep: Vec<bool> = powers_for_angles.iter().map(|&p| p >= threshold).collect();
    let filter = |v: Vec<f64>| -> Vec<f64> {
        v.into_iter()
            .zip(&keep)
            .filter_map(|(x, &k)| k.then_some(x))
            .collect()
    };
    let mut delays = filter(delays);
    let powers = filter(powers);
    let powers_for_angles = filter(powers_for_angles);
    let reduced = powers.len();

    // LOS delay scaling, reverted when powers were generated above.
    if condition == Condition::Los {
        let k = k_factor_db;
        let c_tau = 0.7705 - 0.0433 * k + 2e-4 * k * k + 17e-6 * k * k * k;
        for d in &mut delays {
            *d /= c_tau;
        }
    }

    // Azimuth / zenith scaling constants from the unreduced cluster count.
    let mut c_phi = c_phi_nlos(n_clusters);
    let mut c_theta = c_theta_nlos(n_clusters);
    if condition == Condition::Los {
        let k = k_factor_db;
        c_phi *= 1.1035 - 0.028 * k - 2e-3 * k * k + 1e-4 * k * k * k;
        c_theta *= 1.3086 + 0.0339 * k - 0.0077 * k * k + 2e-4 * k * k * k;
    }

    // Cluster center angles. The link geometry centers the distributions.
    let (tx_zenith, tx_azimuth) = angles_toward(link.tx_pos, link.rx_pos);
    let (rx_zenith, rx_azimuth) = angles_toward(link.rx_pos, link.tx_pos);
    let los_aoa = rx_azimuth.to_degrees();
    let los_zoa = rx_zenith.to_degrees();
    let los_aod = tx_azimuth.to_degrees();
    let los_zod = tx_zenith.to_degrees();

    let mut aoa = Vec::with_capacity(reduced);
    let mut aod = Vec::with_capacity(reduced);
    let mut zoa = Vec::with_capacity(reduced);
    let mut zod = Vec::with_capacity(reduced);
    for c in 0..reduced {
        let rel = (powers_for_angles[c] / power_max).max(f64::MIN_POSITIVE);
        let az_mag = 2.0 * (-rel.ln()).sqrt() / 1.4 / c_phi;
        let zen_mag = -rel.ln() / c_theta;

        let sign = if rng.gen::<f64>() < 0.5 { -1.0 } else { 1.0 };
        aoa.push(sign * az_mag * asa + normal(rng) * asa / 7.0 + los_aoa);
        aod.push(sign * az_mag * asd + normal(rng) * asd / 7.0 + los_aod);
        zoa.push(sign * zen_mag * zsa + normal(rng) * zsa / 7.0 + los_zoa);
        zod.push(sign * zen_mag * zsd + normal(rng) * zsd / 7.0 + los_zod);
    }

    // Under LOS the first cluster is recentered on the geometric ray and
    // the rest shift with it.
    if condition == Condition::Los {
        let diff_aoa = aoa[0] - los_aoa;
        let diff_aod = aod[0] - los_aod;
        let diff_zoa = zoa[0] - los_zoa;
        let diff_zod = zod[0] - los_zod;
        for c in 0..reduced {
            aoa[c] -= diff_aoa;
            aod[c] -= diff_aod;
            zoa[c] -= diff_zoa;
            zod[c] -= diff_zod;
        }
    }
    for c in 0..reduced {
        aoa[c] = wrap_azimuth_deg(aoa[c]);
        aod[c] = wrap_azimuth_deg(aod[c]);
        zoa[c] = fold_zenith_deg(zoa[c]);
        zod[c] = fold_zenith_deg(zod[c]);
    }

    // Subray angles: fixed offsets scaled by the cluster-internal spreads,
    // independently shuffled per angle type to couple rays at random.
    let zod_offset_scale = 0.375 * 10f64.powf(params.mu_lg_zsd);
    let mut ray_aoa = vec![vec![0.0; n_rays]; reduced];
    let mut ray_aod = vec![vec![0.0; n_rays]; reduced];
    let mut ray_zoa = vec![vec![0.0; n_rays]; reduced];
    let mut ray_zod = vec![vec![0.0; n_rays]; reduced];
    for c in 0..reduced {
        for m in 0..n_rays {
            let alpha = RAY_OFFSET_ALPHA[m % RAY_OFFSET_ALPHA.len()];
            ray_aoa[c][m] = wrap_azimuth_deg(aoa[c] + params.c_asa * alpha).to_radians();
            ray_aod[c][m] = wrap_azimuth_deg(aod[c] + params.c_asd * alpha).to_radians();
            ray_zoa[c][m] = fold_zenith_deg(zoa[c] + params.c_zsa * alpha).to_radians();
            ray_zod[c][m] = fold_zenith_deg(zod[c] + zod_offset_scale * alpha).to_radians();
        }
        ray_aoa[c].shuffle(rng);
        ray_aod[c].shuffle(rng);
        ray_zoa[c].shuffle(rng);
        ray_zod[c].shuffle(rng);
    }

    // Initial subray phases and the LOS specular phase.
    let phases: Vec<Vec<f64>> = (0..reduced)
        .map(|_| (0..n_rays).map(|_| rng.gen_range(-PI..PI)).collect())
        .collect();
    let los_phase = rng.gen_range(-PI..PI);

    // Per element pair, sum subrays with element-location phase terms and
    // radiation patterns; under LOS add the specular ray.
    let n_elem = array.num_elements();
    let mut coeffs = vec![vec![vec![Complex64::new(0.0, 0.0); reduced]; n_elem]; n_elem];
    for u in 0..n_elem {
        let u_loc = array.element_location(u);
        for s in 0..n_elem {
            let s_loc = array.element_location(s);
            for c in 0..reduced {
                let mut rays = Complex64::new(0.0, 0.0);
                for m in 0..n_rays {
                    let rx_phase = element_phase(ray_zoa[c][m], ray_aoa[c][m], u_loc);
                    let tx_phase = element_phase(ray_zod[c][m], ray_aod[c][m], s_loc);
                    let pattern = array.radiation_pattern(ray_zoa[c][m], ray_aoa[c][m])
                        * array.radiation_pattern(ray_zod[c][m], ray_aod[c][m]);
                    rays += Complex64::from_polar(
                        pattern,
                        phases[c][m] + rx_phase + tx_phase,
                    );
                }
                coeffs[u][s][c] = rays * (powers[c] / n_rays as f64).sqrt();
            }
            if condition == Condition::Los {
                let rx_phase = element_phase(rx_zenith, rx_azimuth, u_loc);
                let tx_phase = element_phase(tx_zenith, tx_azimuth, s_loc);
                let pattern = array.radiation_pattern(rx_zenith, rx_azimuth)
                    * array.radiation_pattern(tx_zenith, tx_azimuth);
                let specular =
                    Complex64::from_polar(pattern, los_phase + rx_phase + tx_phase);
                let diffuse_scale = (1.0 / (k_linear + 1.0)).sqrt();
                let specular_scale = (k_linear / (k_linear + 1.0)).sqrt();
                for c in 0..reduced {
                    coeffs[u][s][c] *= diffuse_scale;
                }
                coeffs[u][s][0] += specular * specular_scale;
            }
        }
    }

    ChannelRealization {
        condition,
        k_factor_db,
        coeffs,
        delays_s: delays,
        aoa_deg: aoa,
        zoa_deg: zoa,
        aod_deg: aod,
        zod_deg: zod,
    }
}

fn element_phase(zenith: f64, azimuth: f64, loc: [f64; 3]) -> f64 {
    2.0 * PI
        * (zenith.sin() * azimuth.cos() * loc[0]
            + zenith.sin() * azimuth.sin() * loc[1]
            + zenith.cos() * loc[2])
}

fn wrap_azimuth_deg(mut angle: f64) -> f64 {
    while angle >= 360.0 {
        angle -= 360.0;
    }
    while angle < 0.0 {
        angle += 360.0;
    }
    angle
}

fn fold_zenith_deg(angle: f64) -> f64 {
    let wrapped = wrap_azimuth_deg(angle);
    if wrapped > 180.0 {
        360.0 - wrapped
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionMode, SimConfig};
    use rand::SeedableRng;

    fn engine(mode: ConditionMode) -> ChannelEngine {
        let mut cfg = SimConfig::default();
        cfg.channel.condition_mode = mode;
        ChannelEngine::new(&cfg).unwrap()
    }

    fn link() -> LinkState {
        LinkState::aligned(
            VehicleId(0),
            VehicleId(1),
            Vec3::new(0.0, 0.0, 1.6),
            Vec3::new(40.0, 5.0, 1.6),
            Vec3::new(15.0, 0.0, 0.0),
            Vec3::new(12.0, 0.0, 0.0),
        )
    }

    fn subcarriers() -> Vec<f64> {
        (0..12).map(|i| 60.0e9 + i as f64 * 60.0e3).collect()
    }

    #[test]
    fn realization_entries_are_finite() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Nlos));
        let mut rng = StdRng::seed_from_u64(7);
        let params = eng.params.get(Scenario::V2vUrban, Condition::Nlos);
        let real = generate_realization(&params, Condition::Nlos, &eng.array, &link(), &mut rng);
        for per_rx in &real.coeffs {
            for per_tx in per_rx {
                for c in per_tx {
                    assert!(c.re.is_finite() && c.im.is_finite());
                }
            }
        }
        assert!(real.delays_s.windows(2).all(|w| w[0] <= w[1]));
        // No specular component under NLOS.
        assert_eq!(real.k_factor_db, 0.0);
    }

    #[test]
    fn los_realization_records_its_k_factor() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Los));
        let mut rng = StdRng::seed_from_u64(13);
        let params = eng.params.get(Scenario::V2vUrban, Condition::Los);
        let real = generate_realization(&params, Condition::Los, &eng.array, &link(), &mut rng);
        assert_eq!(real.condition, Condition::Los);
        assert!(real.k_factor_db.is_finite());
        assert_ne!(real.k_factor_db, 0.0);
    }

    #[test]
    fn cluster_powers_sum_to_one_before_pruning() {
        // The power normalization invariant, observed through the total
        // coefficient energy of an isotropic single-element NLOS channel:
        // sum over clusters of |h|^2 averages to the (pruned) power sum,
        // which stays within (0, 1].
        let mut cfg = SimConfig::default();
        cfg.antenna.rows = 1;
        cfg.antenna.cols = 1;
        cfg.antenna.pattern = crate::config::ElementPattern::Isotropic;
        cfg.channel.condition_mode = ConditionMode::Fixed(Condition::Nlos);
        let mut eng = ChannelEngine::new(&cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let params = eng.params.get(Scenario::V2vUrban, Condition::Nlos);
        let mut total = 0.0;
        let trials = 200;
        for _ in 0..trials {
            let real =
                generate_realization(&params, Condition::Nlos, &eng.array, &link(), &mut rng);
            total += real.coeffs[0][0].iter().map(|c| c.norm_sqr()).sum::<f64>();
        }
        let mean = total / trials as f64;
        assert!(mean > 0.5 && mean < 1.5, "mean energy {mean}");
    }

    #[test]
    fn queries_inside_the_coherence_window_reuse_the_realization() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Los));
        let mut rng = StdRng::seed_from_u64(3);
        let l = link();
        let first = eng
            .realization(&l, Condition::Los, SimTime::from_us(0), &mut rng)
            .unwrap();
        let second = eng
            .realization(&l, Condition::Los, SimTime::from_us(10), &mut rng)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn expiry_triggers_a_new_realization() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Los));
        let mut rng = StdRng::seed_from_u64(3);
        let l = link();
        let first = eng
            .realization(&l, Condition::Los, SimTime::from_us(0), &mut rng)
            .unwrap();
        let second = eng
            .realization(&l, Condition::Los, SimTime::from_us(2_000), &mut rng)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn displacement_triggers_a_new_realization() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Los));
        let mut rng = StdRng::seed_from_u64(3);
        let l = link();
        let first = eng
            .realization(&l, Condition::Los, SimTime::from_us(0), &mut rng)
            .unwrap();
        let mut moved = l;
        moved.rx_pos = Vec3::new(45.0, 5.0, 1.6);
        let second = eng
            .realization(&moved, Condition::Los, SimTime::from_us(10), &mut rng)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn mismatched_beams_couple_less_than_aligned_beams() {
        // Same link, same cached realization, queried at t=0 so only the
        // steering differs: a transmitter pointing 90 degrees away from the
        // victim must leak far less power than one aimed straight at it.
        let mut cfg = SimConfig::default();
        cfg.antenna.rows = 4;
        cfg.antenna.cols = 4;
        cfg.antenna.pattern = crate::config::ElementPattern::Isotropic;
        cfg.channel.condition_mode = ConditionMode::Fixed(Condition::Los);
        let mut eng = ChannelEngine::new(&cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(21);

        let aligned = LinkState::aligned(
            VehicleId(0),
            VehicleId(1),
            Vec3::new(0.0, 0.0, 1.6),
            Vec3::new(0.0, 40.0, 1.6),
            Vec3::default(),
            Vec3::default(),
        );
        let mut misaimed = aligned;
        // The transmitter serves a peer off to the side instead.
        misaimed.tx_aim = Vec3::new(40.0, 0.0, 1.6);

        let on_target: f64 = eng
            .link_gain(&aligned, SimTime::ZERO, &subcarriers(), &mut rng)
            .unwrap()
            .iter()
            .sum();
        let off_target: f64 = eng
            .link_gain(&misaimed, SimTime::ZERO, &subcarriers(), &mut rng)
            .unwrap()
            .iter()
            .sum();
        assert!(
            on_target > 10.0 * off_target,
            "on-target {on_target:e} vs off-target {off_target:e}"
        );
    }

    #[test]
    fn forgetting_a_vehicle_drops_its_realizations() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Los));
        let mut rng = StdRng::seed_from_u64(3);
        let l = link();
        let first = eng
            .realization(&l, Condition::Los, SimTime::from_us(0), &mut rng)
            .unwrap();
        eng.forget_vehicle(l.rx);
        let second = eng
            .realization(&l, Condition::Los, SimTime::from_us(10), &mut rng)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn zero_distance_link_has_unit_gain() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Los));
        let mut rng = StdRng::seed_from_u64(3);
        let mut l = link();
        l.rx_pos = l.tx_pos;
        let gains = eng
            .link_gain(&l, SimTime::ZERO, &subcarriers(), &mut rng)
            .unwrap();
        assert!(gains.iter().all(|&g| (g - 1.0).abs() < 1e-12));
    }

    #[test]
    fn identical_seeds_give_identical_gains() {
        let gains: Vec<Vec<f64>> = (0..2)
            .map(|_| {
                let mut eng = engine(ConditionMode::Probabilistic);
                let mut rng = StdRng::seed_from_u64(42);
                eng.link_gain(&link(), SimTime::from_us(500), &subcarriers(), &mut rng)
                    .unwrap()
            })
            .collect();
        assert_eq!(gains[0], gains[1]);
    }

    #[test]
    fn link_gain_is_finite_and_positive_losses_apply() {
        let mut eng = engine(ConditionMode::Fixed(Condition::Nlos));
        let mut rng = StdRng::seed_from_u64(5);
        let gains = eng
            .link_gain(&link(), SimTime::from_us(100), &subcarriers(), &mut rng)
            .unwrap();
        assert_eq!(gains.len(), 12);
        for g in gains {
            assert!(g.is_finite());
            assert!(g >= 0.0);
            // 40 m at 60 GHz loses far more than 60 dB.
            assert!(g < 1e-6);
        }
    }

}
