//! One-shot `say` command

use std::error::Error;

use crate::cli::render::{cancel_on_interrupt, StreamPrinter, REQUEST_FAILED};
use crate::core::chat_stream::{ConsumerConfig, StreamConsumer, StreamOutcome};
use crate::core::config::Config;
use crate::core::conversation::ConversationSession;

pub async fn run_say(
    config: &Config,
    consumer_config: ConsumerConfig,
    prompt: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    let mut session = ConversationSession::with_model(config.client.model.clone());
    let request = match session.submit(&prompt, config.client.temperature) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!("rejected before sending: {err}");
            eprintln!("{REQUEST_FAILED}");
            std::process::exit(1);
        }
    };

    let consumer = StreamConsumer::new(consumer_config)?;
    let handle = consumer.open(&request)?;
    let interrupt = cancel_on_interrupt(handle.canceller());
    let mut printer = StreamPrinter::stdio();

    let outcome = handle.run(&mut printer).await;
    interrupt.abort();
    if matches!(outcome, StreamOutcome::Cancelled) {
        printer.interrupted();
    }

    match outcome {
        StreamOutcome::Completed(_) | StreamOutcome::Cancelled => Ok(()),
        StreamOutcome::Failed(_) => std::process::exit(1),
    }
}
