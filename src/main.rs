//! Molevo CLI - Run an evolution from JSON configuration and a seed file.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use molevo::{
    compute::evolution::{GenerationOrchestrator, GraphModel},
    schema::{Element, MolGraph, RunConfig, parse_smiles},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 3 {
        eprintln!("Usage: {} <config.json> <seeds.smi> [outcome.json]", args[0]);
        eprintln!();
        eprintln!("Evolve molecules from seed SMILES with a demonstration scorer.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json   Path to run configuration file");
        eprintln!("  seeds.smi     One SMILES per line ('#' starts a comment)");
        eprintln!("  outcome.json  Optional path for the full run outcome");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let seeds_path = PathBuf::from(&args[2]);
    let outcome_path = args.get(3).map(PathBuf::from);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: RunConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    // Load seeds
    let seeds_str = fs::read_to_string(&seeds_path).unwrap_or_else(|e| {
        eprintln!("Error reading seed file: {}", e);
        std::process::exit(1);
    });

    let mut engine = GenerationOrchestrator::new(config.clone(), GraphModel::new(), demo_score)
        .unwrap_or_else(|e| {
            eprintln!("Error creating engine: {}", e);
            std::process::exit(1);
        });

    let mut seeds = 0;
    for (line_no, line) in seeds_str.lines().enumerate() {
        let Some(smiles) = line
            .split('#')
            .next()
            .and_then(|content| content.split_whitespace().next())
        else {
            continue;
        };
        match engine.add_seed_text(smiles) {
            Ok(_) => seeds += 1,
            Err(e) => eprintln!("Skipping seed on line {}: {}", line_no + 1, e),
        }
    }

    println!("Molevo Evolution");
    println!("================");
    println!("Seeds: {}", seeds);
    println!(
        "Population: {} survivors, {} children per generation",
        config.population.max_size, config.population.children_per_generation
    );
    match config.termination.max_generations {
        Some(max) => println!("Max generations: {}", max),
        None => println!("Max generations: unbounded"),
    }
    println!();

    println!("Running evolution...");
    let start = Instant::now();
    let outcome = engine
        .run_with_callback(|record| {
            println!(
                "  Generation {}: best={:.3}, mean={:.3}, size={}, children={}/{}, diversity={:.3}",
                record.generation,
                record.best_fitness.unwrap_or(f64::NAN),
                record.mean_fitness.unwrap_or(f64::NAN),
                record.population_size,
                record.children_produced,
                record.children_requested,
                record.diversity
            );
        })
        .unwrap_or_else(|e| {
            eprintln!("Evolution failed: {}", e);
            std::process::exit(1);
        });

    let elapsed = start.elapsed();

    println!();
    println!("Stopped: {} ({:?})", outcome.reason, outcome.state);
    println!("Generations: {}", outcome.stats.generations);
    println!(
        "Scoring: {} calls, {} failures, {} cache hits",
        outcome.stats.scoring_calls, outcome.stats.scoring_failures, outcome.stats.cache_hits
    );
    println!("Time: {:.2}s", elapsed.as_secs_f32());
    println!();
    println!("Top molecules:");
    for individual in outcome.population.iter().take(10) {
        println!(
            "  {:>8.3}  {}  (gen {}, {})",
            individual.score.fitness().unwrap_or(f64::NAN),
            individual.text,
            individual.generation,
            individual.id
        );
    }

    if let Some(path) = outcome_path {
        let json = serde_json::to_string_pretty(&outcome).unwrap_or_else(|e| {
            eprintln!("Error serializing outcome: {}", e);
            std::process::exit(1);
        });
        if let Err(e) = fs::write(&path, json) {
            eprintln!("Error writing outcome: {}", e);
            std::process::exit(1);
        }
        println!();
        println!("Outcome written to {}", path.display());
    }
}

/// Demonstration fitness: heavy-atom count near 20, a moderate heteroatom
/// share and a bonus for ring atoms.
fn demo_score(smiles: &str) -> Result<f64, String> {
    let graph: MolGraph = parse_smiles(smiles).map_err(|e| e.to_string())?;
    let atoms = graph.atom_count() as f64;
    if atoms == 0.0 {
        return Err("empty molecule".to_string());
    }

    let hetero = graph
        .atoms()
        .iter()
        .filter(|&&e| e != Element::C)
        .count() as f64;
    let rings = graph.ring_atom_count() as f64;

    let size = -((atoms - 20.0) / 10.0).powi(2);
    let polarity = -((hetero / atoms - 0.25) * 4.0).powi(2);
    let ring_share = rings / atoms;
    Ok(size + polarity + ring_share)
}

fn print_example_config() {
    let config = RunConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
    println!();
    println!("Example seeds (seeds.smi):");
    println!("CCO");
    println!("CC(=O)NC");
    println!("C1CCNCC1  # piperidine");
}
