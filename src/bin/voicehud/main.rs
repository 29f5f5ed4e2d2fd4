//! Console entrypoint: runs the voice interaction core against stand-in
//! capabilities so the conversation pipeline can be exercised from a
//! terminal. Typed lines play the role of committed transcripts; replies
//! are printed instead of synthesized.

mod host;

use std::io::{self, BufRead};
use std::panic;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use voicehud::{
    init_logging, init_telemetry, log_debug, log_file_path, log_panic, AppConfig, Orchestrator,
    SpeechOutputQueue,
};

use crate::host::{ConsoleTts, LocalEchoDispatch, UnavailableStt};

/// Max buffered stdin lines before the reader blocks.
const STDIN_CHANNEL_CAPACITY: usize = 64;

fn spawn_stdin_thread() -> Receiver<String> {
    let (tx, rx) = bounded(STDIN_CHANNEL_CAPACITY);
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_help() {
    println!("commands: /quit /cancel /mic /alert /ack /state /transcript /help");
    println!("anything else is sent to the assistant as typed input");
}

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_telemetry(&config);

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        default_hook(info);
    }));

    log_debug("=== VoiceHUD console host started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    let tuning = config.voice_tuning();
    let output = SpeechOutputQueue::new(config.voice_options(), tuning.clone());
    let mut orch = Orchestrator::new(
        Box::new(UnavailableStt),
        Box::new(UnavailableStt),
        Box::new(ConsoleTts::default()),
        Box::new(LocalEchoDispatch::default()),
        output,
        config.effective_wake_phrases(),
        tuning,
    );
    let states = orch.subscribe_states();
    if !config.no_wake {
        orch.enable_wake(Instant::now());
    }

    println!("voicehud console host (no microphone; type to talk)");
    print_help();

    let stdin_rx = spawn_stdin_thread();
    let tick_interval = Duration::from_millis(config.tick_ms);
    loop {
        let now = Instant::now();
        match stdin_rx.try_recv() {
            Ok(line) => {
                let line = line.trim().to_string();
                match line.as_str() {
                    "" => {}
                    "/quit" => break,
                    "/help" => print_help(),
                    "/cancel" => {
                        orch.cancel_all();
                        println!("cancelled");
                    }
                    "/mic" => orch.toggle_capture(now),
                    "/alert" => {
                        if !orch.raise_alert() {
                            println!("alert suppressed; assistant is busy");
                        }
                    }
                    "/ack" => orch.acknowledge_alert(),
                    "/state" => println!("state: {}", orch.current_state().label()),
                    "/transcript" => {
                        for entry in orch.transcript().entries() {
                            println!("[{}] {}", entry.role.label(), entry.content);
                        }
                    }
                    _ => orch.submit_text(&line, now),
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }

        orch.tick(now);
        while let Some(change) = states.try_next() {
            println!("[{}]", change.current.label());
        }
        thread::sleep(tick_interval);
    }

    orch.cancel_all();
    log_debug("=== VoiceHUD console host exiting ===");
    Ok(())
}
