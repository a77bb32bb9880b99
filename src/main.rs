//! This module defines the main functionality of hyscan, a hyperspectral conveyor scanner.

pub mod module; // Import the module submodule that contains other modules
use std::io::BufRead;
use std::sync::{mpsc, Arc};
use std::{thread, time};

use crate::module::com::queue::command_queue;
use crate::module::com::Command;
use crate::module::define; // Import the define module that contains constants and types
use crate::module::device::{self, CameraDriver, CloseMode};
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::pilot::scan;
use crate::module::state::{self, SharedState};
use crate::module::util::init::resource::init; // Import the resource initialization function
use crate::module::util::notify::{bridge, UiEvent};
use crate::module::vision::calibrate::ReferenceKind;
use crate::module::vision::classifier::PixelClassifier;

// The main function of hyscan
pub fn main() {
    if let Err(e) = run() {
        log::error!("{}", e);
        eprintln!("hyscan: {}", e);
        std::process::exit(1);
    }
}

fn run() -> HyscanResult<()> {
    // Prepare the resources by initializing the property struct
    let conf_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| define::path::DATA_DIR.to_string());
    let property = init(&conf_dir)?;

    // Initialize the logging system with the data directory and the system name
    init_log(
        property.path.dir.data.as_str(),
        define::system::NAME,
        &property.conf.system.log_level,
    )?;
    log::info!("Starting hyscan...");

    let (notifier, events) = bridge();
    let (commands, queue) = command_queue();
    let shared = Arc::new(SharedState::new(property.conf.pipeline.visualize));
    let classifier = match PixelClassifier::load(&property) {
        Ok(c) => Some(Arc::new(c)),
        Err(e) => {
            log::warn!("Running without pixel classifier: {}", e);
            notifier.show_message(format!("Pixel classifier not loaded: {}", e));
            None
        }
    };
    let driver: Arc<dyn CameraDriver> = Arc::from(device::driver(&property.conf));

    // Start the protocol thread that talks to the motion controller
    let protocol = module::drive::run(
        property.clone(),
        Arc::clone(&shared),
        queue,
        notifier.clone(),
        classifier,
    )?;

    // Console input is read on its own thread; this thread owns the output
    let (input_tx, input) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            if input_tx.send(line).is_err() {
                break;
            }
        }
    });
    println!("{}", HELP);

    loop {
        for event in events.try_iter() {
            print_event(&event);
        }
        let line = match input.recv_timeout(time::Duration::from_millis(50)) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            // stdin closed
            Err(mpsc::RecvTimeoutError::Disconnected) => "quit!".to_string(),
        };
        match parse(&line) {
            ConsoleAction::Enqueue(cmd) => {
                if !commands.enqueue(cmd) {
                    println!("protocol loop is not running");
                }
            }
            ConsoleAction::Connect => {
                let (shared, driver, notifier) =
                    (Arc::clone(&shared), Arc::clone(&driver), notifier.clone());
                thread::spawn(move || {
                    let _ = state::connect_camera(&shared, driver.as_ref(), &notifier);
                });
            }
            ConsoleAction::Capture(kind) => {
                let (shared, property, notifier) =
                    (Arc::clone(&shared), property.clone(), notifier.clone());
                thread::spawn(move || {
                    let _ = scan::capture(&shared, &property, &notifier, kind);
                });
            }
            ConsoleAction::Visualize(on) => {
                shared.set_visualize(on);
                println!("visualize {}", if on { "on" } else { "off" });
            }
            ConsoleAction::Status => match shared.last_status() {
                Some(report) => println!("{}", report.summary()),
                None => println!("no status yet ({})", shared.controller_state()),
            },
            ConsoleAction::Quit(mode) => match state::shutdown(&shared, mode) {
                Ok(()) => break,
                Err(e) => println!("{} (retry with quit!)", e),
            },
            ConsoleAction::Help => println!("{}", HELP),
            ConsoleAction::Invalid(why) => println!("{}", why),
        }
    }

    let _ = protocol.join();
    for event in events.try_iter() {
        print_event(&event);
    }
    log::info!("hyscan stopped");
    Ok(())
}

const HELP: &str = "commands: start | stop | info | length <0-1> | speed <0.01-0.2> | send <raw> \
| connect | black | white | visualize on|off | status | quit | quit! | help";

/// What a console line asks for.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleAction {
    Enqueue(Command),
    Connect,
    Capture(ReferenceKind),
    Visualize(bool),
    Status,
    Quit(CloseMode),
    Help,
    Invalid(String),
}

fn parse(line: &str) -> ConsoleAction {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or("");
    let arg = words.next();
    let number = |arg: Option<&str>| arg.and_then(|a| a.parse::<f64>().ok());
    match (verb, arg) {
        ("start", _) | ("start_scan", _) => ConsoleAction::Enqueue(Command::start_scan()),
        ("stop", _) | ("stop_scan", _) => ConsoleAction::Enqueue(Command::stop_scan()),
        ("info", _) | ("information", _) => ConsoleAction::Enqueue(Command::information()),
        ("length", a) => match number(a).map(Command::length) {
            Some(Ok(cmd)) => ConsoleAction::Enqueue(cmd),
            Some(Err(why)) => ConsoleAction::Invalid(why),
            None => ConsoleAction::Invalid("length needs a number".to_string()),
        },
        ("speed", a) => match number(a).map(Command::speed) {
            Some(Ok(cmd)) => ConsoleAction::Enqueue(cmd),
            Some(Err(why)) => ConsoleAction::Invalid(why),
            None => ConsoleAction::Invalid("speed needs a number".to_string()),
        },
        ("send", Some(raw)) => ConsoleAction::Enqueue(Command::new(raw)),
        ("connect", _) => ConsoleAction::Connect,
        ("black", _) => ConsoleAction::Capture(ReferenceKind::Black),
        ("white", _) => ConsoleAction::Capture(ReferenceKind::White),
        ("visualize", Some("on")) => ConsoleAction::Visualize(true),
        ("visualize", Some("off")) => ConsoleAction::Visualize(false),
        ("status", _) => ConsoleAction::Status,
        ("quit", _) => ConsoleAction::Quit(CloseMode::Graceful),
        ("quit!", _) => ConsoleAction::Quit(CloseMode::Force),
        ("help", _) | ("", _) => ConsoleAction::Help,
        _ => ConsoleAction::Invalid(format!("unknown command: {}", line.trim())),
    }
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::Message(text) => println!("[message] {}", text),
        UiEvent::ConnectionState(link, state) => println!("[{:?}] {}", link, state),
        UiEvent::Telemetry(text) => println!("[telemetry] {}", text),
        UiEvent::CycleComplete => println!("[cycle] scan cycle complete"),
    }
}

/// This function initializes the logger system using the log4rs crate.
///
/// # Arguments
/// * `dir` - A string slice that holds the directory where the log file will be stored
/// * `name` - A string slice that holds the name of the logger and the log file
/// * `level` - Level name such as `INFO` or `debug`
///
/// # Log Example
/// ```
/// log::debug!("Debug Message"); // Log a debug message
/// log::info!("Info Message"); // Log an info message
/// log::warn!("Warning Message"); // Log a warning message
/// log::error!("Error Message"); // Log an error message
/// ```
fn init_log(dir: &str, name: &str, level: &str) -> HyscanResult<()> {
    use crate::module::util::path::join; // Import the join function from the path module
    use log::LevelFilter; // Import the LevelFilter enum from the log crate
    use log4rs::append::file::FileAppender; // Import the FileAppender struct from the log4rs crate
    use log4rs::config::{Appender, Config, Root}; // Import the Appender, Config, and Root structs from the log4rs crate
    use log4rs::encode::pattern::PatternEncoder; // Import the PatternEncoder struct from the log4rs crate

    let level: LevelFilter = level
        .parse()
        .map_err(|_| HyscanError::Logging(format!("unknown log level '{}'", level)))?;

    let logfile = FileAppender::builder() // Create a new FileAppender builder
        .encoder(Box::new(PatternEncoder::new("{h({d} - {l}: {m}{n})}")))
        .build(join(&[dir, define::path::LOG_DIR, &format!("{}.log", name)]))?;

    let config = Config::builder() // Create a new Config builder
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(level))
        .map_err(|e| HyscanError::Logging(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| HyscanError::Logging(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{debug, error, info, warn};
    use std::fs;

    // A simple test case for the init_log function
    #[test]
    fn test_log() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        let name = "test_log";

        // Call the init_log function
        init_log(dir, name, "INFO").unwrap();

        // Perform some logging
        debug!("Debug Message");
        info!("Info Message");
        warn!("Warning Message");
        error!("Error Message");

        // Read the contents of the log file
        let log_file_path = tmp.path().join("log").join("test_log.log");
        let log_contents = fs::read_to_string(log_file_path).expect("Failed to read log file");

        // Assert that log messages are present in the file
        assert!(!log_contents.contains("Debug Message"));
        assert!(log_contents.contains("Info Message"));
        assert!(log_contents.contains("Warning Message"));
        assert!(log_contents.contains("Error Message"));
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(matches!(
            init_log("/tmp", "never", "loud"),
            Err(HyscanError::Logging(_))
        ));
    }

    #[test]
    fn console_lines() {
        assert_eq!(parse("start"), ConsoleAction::Enqueue(Command::start_scan()));
        assert_eq!(
            parse("speed 0.05"),
            ConsoleAction::Enqueue(Command::new("speed@0.05"))
        );
        assert!(matches!(parse("speed 3"), ConsoleAction::Invalid(_)));
        assert!(matches!(parse("length"), ConsoleAction::Invalid(_)));
        assert_eq!(parse("send home"), ConsoleAction::Enqueue(Command::new("home")));
        assert_eq!(parse("white"), ConsoleAction::Capture(ReferenceKind::White));
        assert_eq!(parse("visualize off"), ConsoleAction::Visualize(false));
        assert_eq!(parse("quit!"), ConsoleAction::Quit(CloseMode::Force));
        assert!(matches!(parse("fly"), ConsoleAction::Invalid(_)));
    }
}
