//! Card operations exposed on the command line

use std::path::{Path, PathBuf};

use colored::Colorize;
use eyre::WrapErr;
use tapcard_session::{
    CardError, ChainCode, Command, Pin, Psbt, Response, SetupComplete, SetupDriver, SetupParams,
};
use tracing::{debug, info};

use crate::session::SimOrchestrator;

async fn cancelled_by_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler the command can only finish on its own
        std::future::pending::<()>().await;
    }
}

async fn run(orchestrator: &SimOrchestrator, command: Command) -> Result<Response, CardError> {
    orchestrator.execute_until(command, cancelled_by_ctrl_c()).await
}

fn report(error: CardError) -> eyre::Report {
    eprintln!("{}", error.user_message().red());
    eyre::Report::new(error)
}

fn unexpected(response: &Response) -> eyre::Report {
    eyre::eyre!("unexpected response from card: {response:?}")
}

/// Read the master extended public key
pub(crate) async fn derive_command(orchestrator: &SimOrchestrator, pin: &str) -> eyre::Result<()> {
    let command = Command::Derive { pin: Pin::new(pin)? };
    match run(orchestrator, command).await.map_err(report)? {
        Response::DeriveInfo(info) => {
            println!("Master fingerprint: {}", info.master_fingerprint);
            println!("Derivation path:    {}", info.path);
            println!("Extended key:       {}", info.extended_public_key.green());
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

/// Export the backup into `out_dir`, named after the card
pub(crate) async fn backup_command(
    orchestrator: &SimOrchestrator,
    pin: &str,
    out_dir: &Path,
) -> eyre::Result<()> {
    let command = Command::Backup { pin: Pin::new(pin)? };
    let backup = match run(orchestrator, command).await.map_err(report)? {
        Response::Backup(backup) => backup,
        other => return Err(unexpected(&other)),
    };

    let identity = orchestrator
        .current_card_identity()
        .ok_or_else(|| eyre::eyre!("card identity was not recorded"))?;
    let path = write_backup(out_dir, &identity.backup_file_name(), &backup.to_hex())?;

    info!(card = %identity, "Backup exported");
    println!("Backup of card {} written to {}", identity.to_string().bold(), path.display());
    Ok(())
}

fn write_backup(out_dir: &Path, file_name: &str, contents: &str) -> eyre::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .wrap_err_with(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(file_name);
    std::fs::write(&path, contents).wrap_err_with(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Sign a hex-encoded PSBT
pub(crate) async fn sign_command(
    orchestrator: &SimOrchestrator,
    pin: &str,
    psbt_hex: &str,
) -> eyre::Result<()> {
    let psbt = hex::decode(psbt_hex.trim()).wrap_err("PSBT must be hex encoded")?;
    let command = Command::Sign {
        psbt: Psbt::new(psbt),
        pin: Pin::new(pin)?,
    };
    match run(orchestrator, command).await.map_err(report)? {
        Response::Signed(signed) => {
            println!("{}", hex::encode(signed.as_bytes()));
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

/// Replace the card PIN
pub(crate) async fn change_pin_command(
    orchestrator: &SimOrchestrator,
    current_pin: &str,
    new_pin: &str,
) -> eyre::Result<()> {
    let command = Command::ChangePin {
        current_pin: Pin::new(current_pin)?,
        new_pin: Pin::new(new_pin)?,
    };
    match run(orchestrator, command).await.map_err(report)? {
        Response::PinChanged => {
            println!("{}", "PIN changed".green());
            Ok(())
        }
        other => Err(unexpected(&other)),
    }
}

/// Set up a fresh card, asking for more taps until every step ran
pub(crate) async fn setup_command(
    orchestrator: &SimOrchestrator,
    factory_pin: &str,
    new_pin: &str,
    chain_code: Option<&str>,
    out_dir: Option<&Path>,
) -> eyre::Result<()> {
    let chain_code = chain_code.map(ChainCode::from_hex).transpose()?;
    let params = SetupParams::new(Pin::new(factory_pin)?, Pin::new(new_pin)?, chain_code);
    let driver = SetupDriver::new(orchestrator);

    let complete: SetupComplete = tokio::select! {
        result = driver.run(params) => result.map_err(report)?,
        () = cancelled_by_ctrl_c() => return Err(report(CardError::Cancelled)),
    };
    debug!(backup = ?complete.backup, "Setup finished");

    println!("{}", "Card set up".green());
    println!("Master fingerprint: {}", complete.derive_info.master_fingerprint);
    println!("Extended key:       {}", complete.derive_info.extended_public_key);

    if let (Some(out_dir), Some(identity)) = (out_dir, orchestrator.current_card_identity()) {
        let path = write_backup(out_dir, &identity.backup_file_name(), &complete.backup.to_hex())?;
        println!("Backup written to {}", path.display());
    }
    Ok(())
}
