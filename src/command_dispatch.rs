//! Purpose: Hold top-level CLI command dispatch for `tdjson`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: The library is loaded exactly once per invocation.
//! Invariants: The log sink is removed before the command returns.

use super::*;
use tdjson_adapter::api::{
    self, LegacyClients, LegacyHandle, LogMessage, Multiplexer, Tdjson, log_channel,
};
use tdjson_adapter::notice::{LogNotice, log_notice_json, notice_time_now};
use tokio::task::JoinHandle;

pub(super) async fn dispatch_command(command: Command, config: Config) -> Result<(), Error> {
    let tdjson = api::load(&config.library, false)?;
    run_loaded(&tdjson, command, config.log_verbosity).await
}

async fn run_loaded(
    tdjson: &Tdjson,
    command: Command,
    log_verbosity: Option<i32>,
) -> Result<(), Error> {
    let forwarder = log_verbosity
        .map(|max_verbosity_level| install_log_forwarder(tdjson, max_verbosity_level));

    let result = run_command(tdjson, command).await;

    if let Some(forwarder) = forwarder {
        tdjson.set_log_message_callback(0, None);
        if let Err(err) = forwarder.await {
            tracing::warn!(error = %err, "log forwarder task failed");
        }
    }
    result
}

async fn run_command(tdjson: &Tdjson, command: Command) -> Result<(), Error> {
    match command {
        Command::Execute { request } => {
            let mux = tdjson.multiplexer();
            let response = tokio::task::block_in_place(|| mux.execute(&request))?;
            emit_payload(response.as_deref());
            Ok(())
        }
        Command::Session {
            legacy,
            timeout,
            max,
            requests,
        } => {
            let timeout = parse_timeout(timeout)?;
            if legacy {
                run_legacy_session(tdjson.legacy(), timeout, max, &requests).await
            } else {
                run_session(tdjson.multiplexer(), timeout, max, &requests).await
            }
        }
    }
}

async fn run_session(
    mux: &Multiplexer,
    timeout: Duration,
    max: Option<usize>,
    requests: &[String],
) -> Result<(), Error> {
    mux.init(timeout);
    let client_id = mux.create_client_id()?;
    for request in requests {
        mux.send(client_id, request)?;
    }

    let mut printed = 0;
    while max.is_none_or(|max| printed < max) {
        let pending = mux.receive()?;
        tokio::select! {
            response = pending => match response? {
                Some(payload) => {
                    emit_payload(Some(&payload));
                    printed += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                mux.unreference();
                break;
            }
        }
    }
    mux.wait_idle().await;
    Ok(())
}

async fn run_legacy_session(
    clients: &LegacyClients,
    timeout: Duration,
    max: Option<usize>,
    requests: &[String],
) -> Result<(), Error> {
    let handle = clients.create(timeout);
    let outcome = legacy_exchange(clients, &handle, max, requests).await;
    clients.destroy(handle);
    outcome
}

async fn legacy_exchange(
    clients: &LegacyClients,
    handle: &LegacyHandle,
    max: Option<usize>,
    requests: &[String],
) -> Result<(), Error> {
    for request in requests {
        clients.send(handle, request)?;
    }

    let mut printed = 0;
    while max.is_none_or(|max| printed < max) {
        let pending = clients.receive(handle)?;
        tokio::select! {
            response = pending => match response? {
                Some(payload) => {
                    emit_payload(Some(&payload));
                    printed += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn install_log_forwarder(tdjson: &Tdjson, max_verbosity_level: i32) -> JoinHandle<()> {
    let (callback, mut rx) = log_channel();
    tdjson.set_log_message_callback(max_verbosity_level, Some(callback));
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            emit_log_notice(message);
        }
    })
}

fn emit_log_notice(message: LogMessage) {
    let notice = LogNotice::from_message(message, notice_time_now().unwrap_or_default());
    let json = serde_json::to_string(&log_notice_json(&notice)).unwrap_or_else(|_| {
        "{\"log\":{\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_payload(payload: Option<&str>) {
    println!("{}", payload.unwrap_or("null"));
}
