//! Neural CA CLI - Run simulations from JSON configuration or a named preset.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use neural_ca::{
    compute::{Seed, Simulation},
    schema::{FillMode, NcaConfig, PRESET_NAMES},
};

fn usage(program: &str) {
    eprintln!(
        "Usage: {} <config.json | --preset NAME> [steps] [--export PATH]",
        program
    );
    eprintln!();
    eprintln!("Run a neural cellular automaton.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.json     Path to simulation configuration file");
    eprintln!("  --preset NAME   Built-in configuration ({})", PRESET_NAMES.join(", "));
    eprintln!("  steps           Number of simulation steps (default: 100)");
    eprintln!("  --export PATH   Write the final state as JSON");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        usage(&args[0]);
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let mut preset: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut export_path: Option<PathBuf> = None;
    let mut steps: u64 = 100;

    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--preset" => {
                preset = Some(
                    rest.next()
                        .cloned()
                        .unwrap_or_else(|| fail("--preset needs a name")),
                )
            }
            "--export" => {
                export_path = Some(PathBuf::from(
                    rest.next()
                        .unwrap_or_else(|| fail("--export needs a path")),
                ))
            }
            other if config_path.is_none() && preset.is_none() && !other.starts_with("--") => {
                config_path = Some(PathBuf::from(other))
            }
            other => {
                steps = other
                    .parse()
                    .unwrap_or_else(|_| fail(format!("Unexpected argument: {}", other)))
            }
        }
    }

    // Load configuration
    let config = match (&preset, &config_path) {
        (Some(name), _) => {
            NcaConfig::preset(name).unwrap_or_else(|e| fail(format!("Error: {}", e)))
        }
        (None, Some(path)) => {
            let config_str = fs::read_to_string(path)
                .unwrap_or_else(|e| fail(format!("Error reading config file: {}", e)));
            serde_json::from_str(&config_str)
                .unwrap_or_else(|e| fail(format!("Error parsing config: {}", e)))
        }
        (None, None) => {
            usage(&args[0]);
            std::process::exit(1);
        }
    };

    // Seed fill comes from a sibling `<config>.seed.json` when present
    let fill: FillMode = match config_path.map(|p| p.with_extension("seed.json")) {
        Some(seed_path) if seed_path.exists() => {
            let seed_str = fs::read_to_string(&seed_path)
                .unwrap_or_else(|e| fail(format!("Error reading seed file: {}", e)));
            serde_json::from_str(&seed_str)
                .unwrap_or_else(|e| fail(format!("Error parsing seed: {}", e)))
        }
        _ => FillMode::default(),
    };

    println!("Neural CA Simulation");
    println!("====================");
    println!(
        "Grid: {}x{} x{} scale ({} channels, {})",
        config.width,
        config.height,
        config.scale,
        config.channels,
        if config.wrap { "toroidal" } else { "bounded" }
    );
    println!("Evolver: {:?}", config.mode);
    println!("Steps: {}", steps);
    println!();

    let mut sim =
        Simulation::new(config).unwrap_or_else(|e| fail(format!("Error building simulation: {}", e)));
    sim.seed(Seed::Fill(&fill))
        .unwrap_or_else(|e| fail(format!("Error seeding: {}", e)));

    let initial = sim.grid().stats().clone();
    println!("Initial state:");
    println!("  Population: {}", initial.population);
    println!("  Density: {:.4}", initial.density);
    println!("  Channel means: {:?}", initial.mean);
    println!();

    println!("Running simulation...");
    let start = Instant::now();

    for i in 0..steps {
        sim.step()
            .unwrap_or_else(|e| fail(format!("Error at step {}: {}", i + 1, e)));

        // Print progress every 10%
        if (i + 1) % (steps / 10).max(1) == 0 {
            let stats = sim.grid().stats();
            let loss = sim.last_loss();
            let elapsed = start.elapsed().as_secs_f32();
            println!(
                "  Step {}/{}: density={:.4}, loss={:.5} (local {:.5}, global {:.5}), {:.1} steps/s",
                i + 1,
                steps,
                stats.density,
                loss.total,
                loss.local,
                loss.global,
                (i + 1) as f32 / elapsed
            );
        }
    }

    let elapsed = start.elapsed();
    let final_stats = sim.grid().stats();

    println!();
    println!("Final state:");
    println!("  Generation: {}", sim.generation());
    println!("  Population: {}", final_stats.population);
    println!("  Density: {:.4}", final_stats.density);
    println!("  Channel means: {:?}", final_stats.mean);
    println!();
    println!(
        "Time: {:.2}s ({:.1} steps/s)",
        elapsed.as_secs_f32(),
        steps as f32 / elapsed.as_secs_f32()
    );

    if let Some(path) = export_path {
        sim.export_state()
            .save(&path)
            .unwrap_or_else(|e| fail(format!("Error exporting state: {}", e)));
        println!("State written to {}", path.display());
    }
}

fn print_example_config() {
    let config = NcaConfig::default();
    let fill = FillMode::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
    println!();
    println!("Example seed (config.seed.json):");
    match serde_json::to_string_pretty(&fill) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}
