//! Run command - dial a contact list against simulated telephony

use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use powerdial_core::prelude::*;

use crate::RunArgs;

/// Execute the run command
pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&args.answer_rate) {
        anyhow::bail!("--answer-rate must be between 0 and 1");
    }

    let mut config = match &args.config {
        Some(path) => DialerConfig::from_json_file(path)?,
        None => DialerConfig::default(),
    };
    if let Some(url) = &args.database {
        config.persistence.database_url = url.clone();
    }
    config.validate()?;

    let raw = std::fs::read_to_string(&args.contacts)
        .with_context(|| format!("reading {}", args.contacts.display()))?;
    let contacts: Vec<ContactSummary> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.contacts.display()))?;

    info!("📞 Starting dialing run");
    info!("   Contacts: {}", contacts.len());
    info!("   Outbound numbers: {}", args.numbers.join(", "));
    info!("   Answer rate: {:.0}%", args.answer_rate * 100.0);

    let gateway = Arc::new(SqliteGateway::connect(&config.persistence).await?);
    let telephony = Arc::new(SimulatedTelephony::new());

    let concurrency = args.concurrency.unwrap_or(config.dispatch.default_concurrency_limit);
    let session = DialingSession::new(concurrency, args.numbers.clone());
    session.validate(&config.dispatch)?;

    let items: Vec<QueueItem> = contacts
        .into_iter()
        .map(|contact| QueueItem::new(session.id.clone(), contact, 0, config.dispatch.default_max_attempts))
        .collect();
    gateway.save_session(&session).await?;
    gateway.save_queue_items(&items).await?;

    tokio::spawn(simulate_callees(telephony.clone(), args.answer_rate, Duration::from_secs(args.talk_secs)));

    let dialer = PowerDialer::new(
        config.dispatch.clone(),
        session,
        telephony,
        gateway,
        config.persistence.retry_writes,
    )?;
    let loaded = dialer.load_session_queue().await?;
    info!("📋 {} queue items loaded", loaded);

    dialer.start().await?;
    tokio::select! {
        _ = dialer.wait_finished() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("⏹️ Interrupted; stopping session");
        }
    }
    dialer.stop().await;
    dialer.flush_stats().await;

    let stats = dialer.stats();
    info!("✅ Session {} {:?}", dialer.session().id, dialer.session().status);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("unique rate: {:.2}", stats.unique_rate());
    Ok(())
}

/// Answer a share of originated calls, hang up answered ones after `talk`
async fn simulate_callees(telephony: Arc<SimulatedTelephony>, answer_rate: f64, talk: Duration) {
    let mut originated = telephony.originated();

    loop {
        let handle = match originated.recv().await {
            Ok((handle, _request)) => handle,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Callee simulation skipped {} calls", skipped);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        let telephony = telephony.clone();
        let (ring_secs, answers) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(1..=4), rng.gen_bool(answer_rate))
        };

        tokio::spawn(async move {
            let still_up = |telephony: &SimulatedTelephony| {
                telephony
                    .state_of(&handle)
                    .map(|state| !state.is_terminal())
                    .unwrap_or(false)
            };

            sleep(Duration::from_millis(300)).await;
            if !still_up(&telephony) || telephony.ring(&handle).is_err() {
                return;
            }

            sleep(Duration::from_secs(ring_secs)).await;
            if !still_up(&telephony) {
                return;
            }
            if !answers {
                let _ = telephony.set_state(&handle, TelephonyCallState::Cancel);
                return;
            }
            if telephony.answer(&handle).is_err() {
                return;
            }

            sleep(talk).await;
            if still_up(&telephony) {
                let _ = telephony.remote_hangup(&handle);
            }
        });
    }
}
