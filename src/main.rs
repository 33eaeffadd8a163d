use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use log::info;

use mmwave_v2v_sim::{Scene, Simulation};

fn run(scene_path: &PathBuf) -> anyhow::Result<()> {
    let scene = Scene::load(scene_path)
        .with_context(|| format!("loading scene {}", scene_path.display()))?;
    info!("loaded scene {}", scene_path.display());

    let mut sim = Simulation::new(&scene).context("building simulation")?;
    sim.run().context("running simulation")?;

    let report = serde_json::to_string_pretty(&sim.export_stats())?;
    println!("{report}");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(scene_path) = env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: mmwave-v2v-sim <scene.json>");
        return ExitCode::FAILURE;
    };

    if let Err(err) = run(&scene_path) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
