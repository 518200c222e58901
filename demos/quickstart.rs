//! Quickstart: one live round with an attacker among honest clients

use std::thread;

use qora_gate::{ClientUpdate, CoordinatorConfig, LinearModel, Model, RoundCoordinator};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Qora-Gate Quickstart Demo\n");

    let mut config = CoordinatorConfig::default();
    config.round.round_deadline_ms = 200;
    let coordinator = RoundCoordinator::new(LinearModel::new(3), config)?;
    let global = coordinator.current_model();

    let (collector, submissions, _abort) = coordinator.open_live_round();
    println!("Simulating 8 clients (7 honest, 1 attacker)...\n");

    let clients: Vec<_> = (0..8)
        .map(|i| {
            let handle = submissions.clone();
            let mut weights = global.weights().clone();
            let value = if i == 7 { 100.0 } else { 1.0 + i as f32 * 0.02 };
            weights.values_mut().for_each(|w| w.fill(value));
            thread::spawn(move || {
                let update = ClientUpdate::new(format!("client_{}", i), weights, 0)
                    .with_sample_count(100);
                handle.submit(update)
            })
        })
        .collect();
    for client in clients {
        client.join().map_err(|_| "client thread panicked")??;
    }

    let round = collector.collect()?;
    let result = coordinator.run_round(round)?;

    println!("Round complete! Generation {}", result.generation);
    println!("   Accepted: {:?}", result.summary.accepted);
    for report in &result.summary.rejected {
        println!(
            "   Rejected: {} (score {:.2} > {:.2})",
            report.client_id, report.score, report.threshold
        );
    }
    println!("   Weights:  {:?}", coordinator.current_model().weights()["linear.weight"]);
    println!("   Expected (close to honest mean): ~1.06");
    Ok(())
}
