//! Demo binary for molt-governor
//!
//! Seeds an in-memory signal store, runs a few decisions through the gates,
//! performs one forced self-modification cycle, and prints the metrics.
//!
//! ## Usage
//!
//! ```text
//! molt-governor [path/to/governor.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output, overriding
//!   `[observability] log_format` from the config file
//! - `RUST_LOG=info`: log level filter

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use molt_governor::config::loader::load_from_file;
use molt_governor::config::watcher::ConfigWatcher;
use molt_governor::signals::{ActivityEntry, ActivityKind, SynthesisRecord, TopologyEntry};
use molt_governor::{
    init_tracing_with, metrics, unix_now, Action, Confidence, DecisionContext, Governor,
    GovernorConfig, InMemorySignalStore, Mode, SignalStore, StaticGenerator,
};
use tokio::sync::watch;
use tracing::{info, warn};

const INITIAL_BODY: &str = "# Identity\nMolty, a curious crustacean.\n\n## Role\nCommunity curator.\n\n\
## Mission\nConnect builders who ship.\n\n## Voice\nWarm and precise.\n\n## Boundaries\nNo spam.";

const PROPOSAL: &str = "STATUS: EVOLVED\n\
RATIONALE: Replies outperform posts; lean into conversation.\n\
DELTA: Mission now favours threads over broadcasts.\n\
<soul>\n# Identity\nMolty, a curious crustacean who listens first.\n\n## Role\n\
Community curator and conversation partner.\n\n## Mission\nConnect builders who ship, \
mostly through thoughtful replies in existing threads rather than new broadcasts.\n\n\
## Voice\nWarm, precise, and brief.\n\n## Boundaries\nNo spam, no pile-ons, no self-promotion.\n</soul>";

async fn seed(store: &InMemorySignalStore) -> Result<(), Box<dyn std::error::Error>> {
    let now = unix_now();
    for (i, peer) in ["crab-1", "crab-2", "lobster-7", "shrimp-3"].iter().enumerate() {
        let i = i as u64;
        store
            .upsert_topology(
                peer,
                TopologyEntry {
                    upvotes: 4 + i,
                    downvotes: 1,
                    replies: 2 * i,
                    score: 10.0 + i as f64,
                    quarantined: false,
                },
            )
            .await?;
        store
            .append_activity(
                ActivityEntry::new(ActivityKind::Comment, now - 7_200 - 60 * i).with_target(*peer),
            )
            .await?;
    }
    store
        .append_synthesis(SynthesisRecord {
            timestamp_secs: now - 10 * 3_600,
            implication: "Reinforce conversational replies".into(),
            summary: "Replies earn more resonance than posts.".into(),
        })
        .await?;
    store
        .append_memory("crab-2 prefers concrete examples".into())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &path {
        Some(path) => load_from_file(path)?,
        None => GovernorConfig::default(),
    };

    let _ = init_tracing_with(config.observability.log_format);
    if config.observability.metrics_enabled {
        metrics::init_metrics()?;
    }
    // Reloads are logged only; the demo keeps the governor it started with.
    let _watcher = match path {
        Some(path) => {
            let (watcher, mut reloads) = ConfigWatcher::new(path, config.clone())?;
            tokio::spawn(async move {
                while let Ok(next) = reloads.recv().await {
                    info!(rapid_mode = next.engagement.rapid_mode, "config reload observed");
                }
            });
            Some(watcher)
        }
        None => None,
    };
    info!(rapid_mode = config.engagement.rapid_mode, "starting molt-governor demo");

    let store = InMemorySignalStore::new();
    seed(&store).await?;

    let generator = Arc::new(StaticGenerator::new(PROPOSAL));
    let governor = Governor::new(&config, Arc::new(store.clone()), generator, INITIAL_BODY);

    let state = governor.gate_state_computer().compute().await;
    info!(?state, "initial gate state");

    let mut multi_source_post = DecisionContext::new(Action::Post, Confidence::High);
    multi_source_post.novelty = true;
    multi_source_post.multi_source_context = true;

    let contexts = vec![
        ("plain post", DecisionContext::new(Action::Post, Confidence::High)),
        ("grounded novel post", multi_source_post),
        (
            "supportive comment",
            DecisionContext::new(Action::Comment, Confidence::High).with_mode(Mode::Supportive),
        ),
        (
            "third corrective reply",
            DecisionContext::new(Action::Comment, Confidence::High)
                .with_mode(Mode::Corrective)
                .with_history(Mode::Corrective, 2),
        ),
        ("unsure comment", DecisionContext::new(Action::Comment, Confidence::Low)),
    ];

    for (label, ctx) in &contexts {
        let decision = governor.decide(ctx).await;
        println!(
            "{label:<24} {:>7} -> {:<7} {}",
            ctx.desired_action, decision.action, decision.rationale
        );
        if decision.action != Action::Skip {
            if let Err(e) = governor.record_action(decision.action).await {
                warn!(error = %e, "failed to record action");
            }
        }
    }

    let mut events = governor.controller().subscribe();
    let outcome = governor.controller().run_cycle(true).await;
    println!("\nself-modification: {}", serde_json::to_string(&outcome)?);
    if let Ok(event) = events.try_recv() {
        info!(?event, "controller event");
    }
    println!("\nactive body:\n{}\n", governor.controller().current_body());

    let status = governor.rate_limiter().status().await;
    println!("rate limit: {}", serde_json::to_string(&status)?);

    // Background loop, stopped immediately to show clean shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = governor.spawn_self_modify_loop(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true)?;
    handle.await?;

    if config.observability.metrics_enabled {
        println!("\n{}", metrics::gather_metrics());
    }
    Ok(())
}
