//! Wiring the orchestrator to the simulated card

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tapcard_session::{Orchestrator, ProgressMessage, SessionState};
use tapcard_sim::{Presentation, SharedCard, SimCodec, SimRadio, SimulatedCard, Timeline};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;

pub(crate) type SimOrchestrator = Orchestrator<SimRadio, SimCodec>;

/// Build an orchestrator over a freshly manufactured simulated card
///
/// A `fresh` card still needs setup; otherwise the card comes sealed with a
/// fixed chain code.
pub(crate) fn build_orchestrator(config: &Config, fresh: bool) -> eyre::Result<SimOrchestrator> {
    let simulator = &config.simulator;
    let card = match simulator.seed()? {
        Some(seed) => SimulatedCard::with_seed(seed),
        None => SimulatedCard::new(),
    }
    .with_pin(simulator.card_pin.clone());
    let card = if fresh { card } else { card.sealed([0x5a; 32]) };

    let delay = Duration::from_millis(simulator.tap_delay_ms);
    let first = Presentation::After {
        delay,
        drop_after: simulator.drop_after,
    };
    let radio = SimRadio::new(SharedCard::new(card), Timeline::new())
        .script([first])
        .fallback(Presentation::After {
            delay,
            drop_after: None,
        });
    debug!(?delay, drop_after = ?simulator.drop_after, fresh, "Simulated card ready");

    Ok(Orchestrator::new(
        Arc::new(radio),
        Arc::new(SimCodec::new()),
        config.session.clone(),
    ))
}

/// Print progress messages and state changes until the orchestrator goes away
pub(crate) fn spawn_progress_printer(orchestrator: &SimOrchestrator) -> JoinHandle<()> {
    let mut progress = orchestrator.subscribe_progress();
    let mut state = orchestrator.subscribe_state();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = progress.recv() => match message {
                    Ok(ProgressMessage::Set(text)) => eprintln!("{}", text.cyan()),
                    Ok(ProgressMessage::Append(text)) => eprint!("{}", text.cyan()),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress printer lagged"),
                    Err(RecvError::Closed) => break,
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    if let SessionState::Executing(kind) = current {
                        debug!(%kind, "Running command");
                    }
                }
            }
        }
    })
}
