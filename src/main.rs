//! dicopt Command-Line Interface
//!
//! # Usage
//!
//! 1. **Settings template** (`dicopt ci [output_file]`):
//!    Writes a commented `dicopt_config.cfg` with every option at its default
//!
//! 2. **Demo optimization** (`dicopt demo [steps] [trajectory.xyz]`):
//!    Optimizes a stretched four-atom chain against the harmonic bond model
//!    and prints a convergence table per step
//!
//! # Examples
//!
//! ```bash
//! dicopt ci
//! dicopt demo 30 chain.xyz
//! RUST_LOG=debug dicopt demo
//! ```
//!
//! Engine parameters are read from `dicopt_config.cfg` files (see
//! `dicopt::settings`); `RUST_LOG` overrides the `[logging] level` setting.

use dicopt::checkpoint::Checkpoint;
use dicopt::config::{Config, KCAL_MOL_PER_AU};
use dicopt::geometry::Geometry;
use dicopt::optimizer::{ConvergenceStatus, DicOptimizer, StepReport};
use dicopt::oracle::{HarmonicBondOracle, LevelOfTheory};
use dicopt::settings::{SettingsManager, CONFIG_FILE_NAME};
use dicopt::topology::Molecule;
use dicopt::trajectory::MemoryTrajectory;
use nalgebra::Vector3;
use std::env;
use std::fs;
use std::path::Path;
use std::process;

/// Bond length of the stretched demo chain (Angstrom).
const DEMO_START_BOND: f64 = 1.9;
/// Equilibrium bond length of the demo oracle (Angstrom).
const DEMO_EQUILIBRIUM_BOND: f64 = 1.5;
/// Demo force constant (Hartree/Bohr²).
const DEMO_FORCE_CONSTANT: f64 = 0.002;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }
    if args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(0);
    }

    let settings = match SettingsManager::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            process::exit(1);
        }
    };
    init_logging(settings.logging().level_filter());
    log::info!("Configuration loaded from: {}", settings.config_source());

    match args[1].as_str() {
        "ci" => {
            let output = args.get(2).map(String::as_str).unwrap_or(CONFIG_FILE_NAME);
            match run_create_settings_template(Path::new(output)) {
                Ok(()) => {
                    println!("Settings template created successfully!");
                    println!("  Output file: {}", output);
                    println!("\nNext steps:");
                    println!("  1. Review and edit {}", output);
                    println!("  2. Keep it in the working directory or in ~/.config/dicopt/");
                }
                Err(e) => {
                    eprintln!("Error creating settings template: {}", e);
                    process::exit(1);
                }
            }
        }
        "demo" => {
            let mut config = settings.config().clone();
            if let Some(steps) = args.get(2) {
                match steps.parse::<usize>() {
                    Ok(n) if n > 0 => config.max_steps = n,
                    _ => {
                        eprintln!("Error: invalid step count: {}", steps);
                        process::exit(1);
                    }
                }
            }
            let trajectory = args.get(3).map(Path::new);
            match run_demo(config, trajectory) {
                Ok(true) => println!("\n****Geometry optimization converged****"),
                Ok(false) => {
                    println!("\nGeometry optimization did not converge within the step budget");
                    process::exit(2);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        other => {
            eprintln!("Error: Unknown command: {}", other);
            print_usage(&args[0]);
            process::exit(1);
        }
    }
}

/// Console logger: stdout, millisecond timestamps, `RUST_LOG` takes precedence.
fn init_logging(level: log::LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis();
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn print_usage(program_name: &str) {
    eprintln!("dicopt - Delocalized internal coordinate geometry optimization");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} ci [output_file]", program_name);
    eprintln!("                    Create a settings template (default: {})", CONFIG_FILE_NAME);
    eprintln!();
    eprintln!("  {} demo [steps] [trajectory.xyz]", program_name);
    eprintln!("                    Optimize a stretched 4-atom chain with a harmonic bond model");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} ci", program_name);
    eprintln!("  {} demo 30 chain.xyz", program_name);
}

fn run_create_settings_template(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "{} already exists. Please remove it first or choose a different location.",
            path.display()
        )
        .into());
    }
    SettingsManager::create_template(path)?;
    Ok(())
}

/// Places atom `d` from the positions of `a`, `b`, `c` and its internal
/// coordinates (bond c-d, angle b-c-d and torsion a-b-c-d, radians).
fn place_atom(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    c: &Vector3<f64>,
    bond: f64,
    angle: f64,
    torsion: f64,
) -> Vector3<f64> {
    let bc = (c - b).normalize();
    let n = (b - a).cross(&bc).normalize();
    let m = n.cross(&bc);
    c + bc * (-bond * angle.cos()) + m * (bond * angle.sin() * torsion.cos()) + n * (bond * angle.sin() * torsion.sin())
}

/// Zig-zag C4 chain with every bond stretched to [`DEMO_START_BOND`].
fn demo_chain() -> Molecule {
    let angle = 112.0_f64.to_radians();
    let a = Vector3::new(0.0, 0.0, 0.0);
    let b = Vector3::new(DEMO_START_BOND, 0.0, 0.0);
    let c = b + Vector3::new(-angle.cos(), angle.sin(), 0.0) * DEMO_START_BOND;
    let d = place_atom(&a, &b, &c, DEMO_START_BOND, angle, 65.0_f64.to_radians());

    let mut coords = Vec::with_capacity(12);
    for atom in [a, b, c, d] {
        coords.extend(atom.iter());
    }
    let geometry = Geometry::new(vec!["C".to_string(); 4], coords);
    Molecule::new(geometry, &[(0, 1), (1, 2), (2, 3)])
}

fn print_convergence_status(report: &StepReport, conv: &ConvergenceStatus, config: &Config) {
    let n = report.gradq.len().max(1) as f64;
    let rms_grad = report.gradq.norm() / n.sqrt();
    let max_grad = report.gradq.amax();
    let dx = &report.x_new - &report.x_old;
    let rms_disp = dx.norm() / (dx.len().max(1) as f64).sqrt();
    let max_disp = dx.amax();
    let flag = |ok: bool| if ok { "YES" } else { "NO " };

    println!(
        "Step {:3}   E = {:14.6} kcal/mol   predicted dE = {:10.6}",
        report.step, report.energy, report.predicted_energy_change
    );
    println!(" Criteria                            Current           Threshold        Pass");
    println!("----------------------------------------------------------------------------");
    println!(
        "  1. RMS gradient                  {:>12.8}      {:>12.8}       {}",
        rms_grad,
        config.thresholds.rms_g,
        flag(conv.rms_grad_converged)
    );
    println!(
        "  2. Max gradient                  {:>12.8}      {:>12.8}       {}",
        max_grad,
        config.thresholds.max_g,
        flag(conv.max_grad_converged)
    );
    println!(
        "  3. RMS displacement              {:>12.8}      {:>12.8}       {}",
        rms_disp,
        config.thresholds.rms,
        flag(conv.rms_disp_converged)
    );
    println!(
        "  4. Max displacement              {:>12.8}      {:>12.8}       {}",
        max_disp,
        config.thresholds.max_dis,
        flag(conv.max_disp_converged)
    );
    println!("----------------------------------------------------------------------------");
    println!();
}

/// Runs the demo optimization; returns whether it converged.
fn run_demo(config: Config, trajectory_path: Option<&Path>) -> Result<bool, Box<dyn std::error::Error>> {
    let molecule = demo_chain();
    let elements = molecule.elements().to_vec();
    let oracle = HarmonicBondOracle::uniform(&[(0, 1), (1, 2), (2, 3)], DEMO_EQUILIBRIUM_BOND, DEMO_FORCE_CONSTANT);
    let mut lot = LevelOfTheory::new(oracle);
    let mut optimizer = DicOptimizer::new(molecule, config)?;
    let mut trajectory = MemoryTrajectory::new();

    println!(
        "Optimizing C4 chain: {} delocalized coordinates from {} primitives",
        optimizer.coordinate_dimension(),
        optimizer.coordinates().primitives().len()
    );
    println!();

    let summary = optimizer.optimize_until_converged(&mut lot, Some(&mut trajectory))?;
    for report in &summary.reports {
        let conv = report.convergence(&optimizer.config().thresholds);
        print_convergence_status(report, &conv, optimizer.config());
    }

    if let Some(last) = summary.reports.last() {
        println!(
            "Final energy {:.6} kcal/mol ({:.8} Hartree) after {} steps, {} oracle evaluations, {} retries",
            last.energy,
            last.energy / KCAL_MOL_PER_AU,
            optimizer.step_count(),
            lot.evaluations(),
            optimizer.retries()
        );
    }

    if let Some(path) = trajectory_path {
        fs::write(path, trajectory.to_xyz(&elements))?;
        println!("Trajectory ({} frames) written to {}", trajectory.len(), path.display());
        let checkpoint_path = path.with_extension("chk");
        Checkpoint::from_optimizer(&optimizer).save(&checkpoint_path)?;
        println!("Checkpoint written to {}", checkpoint_path.display());
    }

    Ok(summary.converged)
}
