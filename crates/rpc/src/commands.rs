//! CLI commands

use anyhow::{bail, Context};
use coldsign_audit::{read_entries, verify_order, AuditEntry};
use coldsign_codec::{PayloadCodec, SignedBundle, SignedSubmission};
use coldsign_coordinator::{spawn_subscriber, Coordinator, LoggingSubscriber, AUDIT_FILE};
use coldsign_core::{SignatureScheme, SystemClock};
use coldsign_verifier::{compute_digest, digest_hex, DeviceKey};
use std::path::Path;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::routes::create_router;
use crate::state::AppState;

/// Run the HTTP service and the expiration sweep until Ctrl-C
pub async fn serve(config: ServiceConfig) -> Result<(), anyhow::Error> {
    let coordinator = Arc::new(
        Coordinator::open(
            config.coordinator.clone(),
            &config.data_dir,
            Arc::new(SystemClock),
        )
        .context("Failed to open coordinator storage")?,
    );

    // Catch up on anything that expired while we were down
    let report = coordinator.sweep_expired();
    if !report.expired.is_empty() {
        tracing::info!(count = report.expired.len(), "Expired requests on startup");
    }

    let sweep = coordinator.spawn_expiry_sweep();
    let announcer = spawn_subscriber(coordinator.events(), Arc::new(LoggingSubscriber));

    let app = create_router(AppState::new(Arc::clone(&coordinator)));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("🚀 Coldsign coordinator listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(sweep);
    announcer.abort();
    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Create a device key, write its secret to `output`, return the public key
pub fn keygen(scheme: SignatureScheme, output: &Path) -> Result<String, anyhow::Error> {
    if output.exists() {
        bail!("Key file already exists: {}", output.display());
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let key = DeviceKey::generate(scheme);
    std::fs::write(output, key.secret_hex())
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("✅ {} key written to {}", scheme, output.display());
    Ok(key.public_key_hex())
}

/// `bundle_id=signed_tx`
pub fn parse_attachment(raw: &str) -> Result<SignedBundle, anyhow::Error> {
    match raw.split_once('=') {
        Some((bundle_id, signed)) if !bundle_id.trim().is_empty() && !signed.trim().is_empty() => {
            Ok(SignedBundle {
                bundle_id: bundle_id.trim().to_string(),
                signed_payload: signed.trim().to_string(),
            })
        }
        _ => bail!("Invalid attachment '{}', expected bundle_id=signed_tx", raw),
    }
}

/// Device-side signing: decode an outbound frame, check its digest, sign it,
/// and return the inbound frame.
pub fn sign_frame(
    codec: &PayloadCodec,
    outbound_frame: &str,
    key: &DeviceKey,
    signer_id: &str,
    attachments: Vec<SignedBundle>,
) -> Result<String, anyhow::Error> {
    let payload = codec
        .decode_outbound(outbound_frame)
        .context("Not a valid outbound frame")?;

    if !payload.signers.iter().any(|s| s.signer_id == signer_id) {
        bail!(
            "Signer {} is not part of request {}",
            signer_id,
            payload.request_id
        );
    }

    let digest = compute_digest(
        &payload.request_id,
        payload
            .bundles
            .iter()
            .map(|b| (b.bundle_id.as_str(), b.unsigned_payload.as_str())),
    );
    if digest_hex(&digest) != payload.digest {
        bail!(
            "Digest mismatch for request {}: payload was altered",
            payload.request_id
        );
    }

    for attachment in &attachments {
        if !payload.bundles.iter().any(|b| b.bundle_id == attachment.bundle_id) {
            bail!("Unknown bundle {}", attachment.bundle_id);
        }
    }

    let signature = key.sign_digest(&digest)?;
    let submission = SignedSubmission::new(
        &payload.request_id,
        signer_id,
        signature,
        attachments,
        Some(chrono::Utc::now()),
    );
    Ok(codec.encode_submission(&submission)?)
}

/// `coldsign sign`: file in, frame out
pub fn sign(
    codec: &PayloadCodec,
    payload_file: &Path,
    key_file: &Path,
    scheme: SignatureScheme,
    signer_id: &str,
    attachments: &[String],
    output: Option<&Path>,
) -> Result<(), anyhow::Error> {
    let frame = std::fs::read_to_string(payload_file)
        .with_context(|| format!("Failed to read {}", payload_file.display()))?;
    let secret = std::fs::read_to_string(key_file)
        .with_context(|| format!("Failed to read {}", key_file.display()))?;
    let key = DeviceKey::from_hex(scheme, &secret)?;
    let attachments = attachments
        .iter()
        .map(|raw| parse_attachment(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let signed = sign_frame(codec, &frame, &key, signer_id, attachments)?;

    match output {
        Some(path) => {
            std::fs::write(path, &signed)?;
            println!("✅ Signed payload written to {}", path.display());
        }
        None => println!("{}", signed),
    }
    Ok(())
}

/// Load the audit trail (optionally for one request) and check its ordering
pub fn audit_report(
    data_dir: &Path,
    request_id: Option<&str>,
) -> Result<Vec<AuditEntry>, anyhow::Error> {
    let path = data_dir.join(AUDIT_FILE);
    if !path.exists() {
        bail!("No audit log at {}", path.display());
    }

    let entries = read_entries(&path)?;
    verify_order(&entries).context("Audit log sequence check failed")?;

    Ok(match request_id {
        Some(id) => entries.into_iter().filter(|e| e.request_id == id).collect(),
        None => entries,
    })
}

/// Print the audit trail
pub fn audit(data_dir: &Path, request_id: Option<&str>) -> Result<(), anyhow::Error> {
    let entries = audit_report(data_dir, request_id)?;

    for entry in &entries {
        println!(
            "#{:<6} {} {:<10} {:<20} {:<12} {}",
            entry.sequence,
            entry.timestamp.to_rfc3339(),
            entry.request_id,
            entry.action.to_string(),
            entry.actor_id,
            entry.detail
        );
    }
    println!("✅ {} entries, sequence strictly increasing", entries.len());
    Ok(())
}
