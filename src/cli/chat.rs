//! Line-oriented `chat` command
//!
//! Each line on stdin is one human turn. Ctrl+C while a reply is streaming
//! cancels that reply; at the prompt it ends the session.

use std::error::Error;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::cli::render::{cancel_on_interrupt, StreamPrinter, REQUEST_FAILED};
use crate::core::chat_stream::{ConsumerConfig, StreamConsumer, StreamOutcome};
use crate::core::config::Config;
use crate::core::conversation::ConversationSession;
use crate::core::message::{Speaker, Turn};
use crate::utils::logging::LoggingState;
use crate::utils::url::redact_url;

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Message(&'a str),
    History,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/history" => Input::History,
        text => Input::Message(text),
    }
}

fn print_history(turns: &[Turn]) {
    for turn in turns {
        let label = match turn.speaker {
            Speaker::Human => "you",
            Speaker::Bot => "bot",
        };
        println!("[{label}] {}", turn.text);
    }
}

pub async fn run_chat(
    config: &Config,
    consumer_config: ConsumerConfig,
    log: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let logging = LoggingState::new(log)?;
    let consumer = StreamConsumer::new(consumer_config)?;
    let mut session = ConversationSession::with_model(config.client.model.clone());
    let temperature = config.client.temperature;

    eprintln!(
        "Connected to {} (logging {}). /history shows the conversation, /quit exits.",
        redact_url(&consumer.config().url),
        logging.status_string()
    );

    logging.start_session()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let text = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::History => {
                print_history(session.history());
                continue;
            }
            Input::Message(text) => text,
        };

        let request = match session.submit(text, temperature) {
            Ok(request) => request,
            Err(err) => {
                debug!("message not sent: {err}");
                eprintln!("{REQUEST_FAILED}");
                continue;
            }
        };
        if let Some(turn) = session.history().last() {
            logging.log_turn(turn)?;
        }

        let handle = consumer.open(&request)?;
        let interrupt = cancel_on_interrupt(handle.canceller());
        let mut printer = StreamPrinter::stdio();
        let outcome = handle.run(&mut printer).await;
        interrupt.abort();
        if matches!(outcome, StreamOutcome::Cancelled) {
            printer.interrupted();
        }

        match outcome {
            StreamOutcome::Completed(reply) => {
                if session.complete(reply) {
                    if let Some(turn) = session.history().last() {
                        logging.log_turn(turn)?;
                    }
                }
            }
            StreamOutcome::Failed(err) => {
                debug!("reply failed: {err}");
                session.abandon();
                logging.log_note("reply failed")?;
            }
            StreamOutcome::Cancelled => {
                session.abandon();
                logging.log_note("reply cancelled")?;
            }
        }
    }

    Ok(())
}
