#![forbid(unsafe_code)]

use std::process::ExitCode;

use attest::KeyStoreAttestor;
use gate::{GateError, StateGate};
use keys::KeyStore;
use log::error;
use message::{Message, MessageValidator};

fn reference_batches() -> Vec<Vec<Message>> {
    vec![
        vec![Message::new(1, 1000, 6000, 8000, 15000)],
        vec![
            Message::new(2, 3005, 100, 5000, 8105),
            Message::new(2, 2000, 160000, 19000, 181000),
            Message::new(2, 2000, 6000, 6000, 14000),
            Message::new(0, 2000, 6000, 8000, 16000),
        ],
        vec![Message::new(2, 2000, 6000, 8000, 16000)],
        vec![Message::new(3, 0, 16000, 8000, 30000)],
    ]
}

fn run() -> Result<(), GateError> {
    let attestor = KeyStoreAttestor::new(KeyStore::new_dev_keystore(0));
    let gate = StateGate::new(attestor.verifier());
    let validator = MessageValidator::new(gate.config().limits);

    for batch in reference_batches() {
        for message in &batch {
            let report = validator.report(message);
            println!(
                "message {} agent {}: valid={} failed={:?}",
                message.message_number,
                message.agent_id,
                report.valid,
                report.failed_checks()
            );
        }
        let watermark = gate.submit_chain(&attestor, &batch)?;
        println!("committed watermark: {}", watermark);
    }

    let log = gate.commit_log();
    log.validate_chain()?;
    println!(
        "commit log: {} records, head {}",
        log.len(),
        hex::encode(log.head_digest())
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("watermark demo failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
