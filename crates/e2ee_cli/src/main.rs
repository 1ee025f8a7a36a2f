mod app;

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use e2ee_crypto::prekey::DevicePrivateBundle;
use e2ee_crypto::ratchet::{DrPacket, DrState};
use e2ee_crypto::x3dh;
use e2ee_proto::packet::{BundleFile, InitHeaderFile};
use e2ee_store::models::{ContactSecretPatch, Role};

use app::Account;

const DEFAULT_OPK_COUNT: u64 = 10;

#[derive(Parser)]
#[command(name = "e2ee")]
#[command(about = "Zero-knowledge secure messenger handshake and ratchet core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identity and device-bundle management.
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
    /// X3DH handshake as either side.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Advance the send chain and print the resulting packet.
    Send {
        user_id: String,
        peer_id: String,
        text: String,
        #[arg(long)]
        password: String,
    },
    /// Advance the receive chain and print the recovered plaintext.
    Recv {
        user_id: String,
        peer_id: String,
        packet_file: PathBuf,
        #[arg(long)]
        password: String,
    },
    /// In-process Alice/Bob walkthrough: X3DH plus ten ratcheted messages.
    Demo,
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Generate IK, SPK, and an initial OPK batch under a new vault password.
    New {
        user_id: String,
        #[arg(long)]
        password: String,
    },
    /// Print the publishable prekey bundle for a user.
    Bundle {
        user_id: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Run X3DH as initiator against a peer's published bundle.
    Initiate {
        user_id: String,
        #[arg(long)]
        peer_bundle: PathBuf,
        #[arg(long)]
        password: String,
    },
    /// Run X3DH as responder, consuming one OPK.
    Respond {
        user_id: String,
        #[arg(long)]
        header: PathBuf,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Identity { action } => identity(action)?,
        Commands::Session { action } => session(action)?,
        Commands::Send { user_id, peer_id, text, password } => send(&user_id, &peer_id, &text, &password)?,
        Commands::Recv { user_id, peer_id, packet_file, password } => {
            recv(&user_id, &peer_id, &packet_file, &password)?
        }
        Commands::Demo => demo()?,
    }
    Ok(())
}

fn identity(action: IdentityAction) -> Result<()> {
    match action {
        IdentityAction::New { user_id, password } => {
            let account = Account::open(&user_id)?;
            let vault = account.create_vault(&password)?;
            let device_id = uuid::Uuid::new_v4().to_string();
            let bundle = DevicePrivateBundle::generate_initial(device_id, 0, DEFAULT_OPK_COUNT);
            let fingerprint = bundle.ik.public.fingerprint();
            account.device_store()?.save(&bundle, &vault, app::now_ms())?;
            println!("identity created for '{user_id}': {fingerprint}");
        }
        IdentityAction::Bundle { user_id, password } => {
            let account = Account::open(&user_id)?;
            let vault = account.unlock_vault(&password)?;
            let bundle = account.device_store()?.load(&vault)?;
            let opk_id = bundle.next_available_opk_id();
            let published = bundle.published(opk_id);
            let file = BundleFile { account_digest: account.digest.clone(), bundle: published };
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
    }
    Ok(())
}

fn session(action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Initiate { user_id, peer_bundle, password } => {
            let account = Account::open(&user_id)?;
            let vault = account.unlock_vault(&password)?;
            let my_bundle = account.device_store()?.load(&vault)?;

            let raw = fs::read(&peer_bundle)?;
            let peer: BundleFile = serde_json::from_slice(&raw)?;

            let material = x3dh::initiate(&my_bundle, &peer.bundle)?;
            let header = material.header.clone();
            let dr = DrState::from_initiator(material);

            let contacts = account.contacts()?;
            contacts.set(
                &peer.account_digest,
                ContactSecretPatch { role: Some(Role::Guest), dr_state: Some(dr.snapshot()), ..Default::default() },
            )?;
            contacts.persist()?;

            let out = InitHeaderFile { account_digest: account.digest.clone(), header };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        SessionAction::Respond { user_id, header, password } => {
            let account = Account::open(&user_id)?;
            let vault = account.unlock_vault(&password)?;
            let mut my_bundle = account.device_store()?.load(&vault)?;

            let raw = fs::read(&header)?;
            let init: InitHeaderFile = serde_json::from_slice(&raw)?;

            let material = x3dh::respond(&mut my_bundle, &init.header)?;
            let dr = DrState::from_responder(material);

            // The OPK (if any) was just consumed; persist the bundle so
            // it is never offered to another initiator.
            account.device_store()?.save(&my_bundle, &vault, app::now_ms())?;

            let contacts = account.contacts()?;
            contacts.set(
                &init.account_digest,
                ContactSecretPatch { role: Some(Role::Owner), dr_state: Some(dr.snapshot()), ..Default::default() },
            )?;
            contacts.persist()?;

            println!("session with '{}' established", init.account_digest);
        }
    }
    Ok(())
}

fn send(user_id: &str, peer_id: &str, text: &str, password: &str) -> Result<()> {
    let account = Account::open(user_id)?;
    let _vault = account.unlock_vault(password)?;
    let contacts = account.contacts()?;

    let record = contacts
        .get(peer_id)
        .ok_or_else(|| anyhow!("no session with '{peer_id}' — run `session initiate`/`respond` first"))?;
    let snapshot = record.dr_state.ok_or_else(|| anyhow!("no ratchet state for '{peer_id}'"))?;

    let mut dr = DrState::restore(&snapshot)?;
    let packet = dr.encrypt(text.as_bytes(), user_id, 1)?;

    contacts.set(peer_id, ContactSecretPatch { dr_state: Some(dr.snapshot()), ..Default::default() })?;
    contacts.persist()?;

    println!("{}", serde_json::to_string_pretty(&packet)?);
    Ok(())
}

fn recv(user_id: &str, peer_id: &str, packet_file: &PathBuf, password: &str) -> Result<()> {
    let account = Account::open(user_id)?;
    let _vault = account.unlock_vault(password)?;
    let contacts = account.contacts()?;

    let record = contacts
        .get(peer_id)
        .ok_or_else(|| anyhow!("no session with '{peer_id}' — run `session initiate`/`respond` first"))?;
    let snapshot = record.dr_state.ok_or_else(|| anyhow!("no ratchet state for '{peer_id}'"))?;

    let raw = fs::read(packet_file)?;
    let packet: DrPacket = serde_json::from_slice(&raw)?;

    let mut dr = DrState::restore(&snapshot)?;
    let plaintext = dr.decrypt(&packet, None)?;

    contacts.set(peer_id, ContactSecretPatch { dr_state: Some(dr.snapshot()), ..Default::default() })?;
    contacts.persist()?;

    println!("{}", String::from_utf8_lossy(&plaintext));
    Ok(())
}

fn demo() -> Result<()> {
    let alice_bundle = DevicePrivateBundle::generate_initial("alice-device", 0, 1);
    let mut bob_bundle = DevicePrivateBundle::generate_initial("bob-device", 0, 1);

    let bob_published = bob_bundle.published(bob_bundle.next_available_opk_id());
    println!("alice fetches bob's bundle: opk offered = {}", bob_published.opk_id.is_some());

    let init = x3dh::initiate(&alice_bundle, &bob_published)?;
    let header = init.header.clone();
    let mut alice_dr = DrState::from_initiator(init);

    let resp = x3dh::respond(&mut bob_bundle, &header)?;
    let mut bob_dr = DrState::from_responder(resp);
    println!("x3dh complete; bob's opk pool now has {} entries", bob_bundle.opk_count());

    for i in 0..5 {
        let text = format!("alice says hello #{i}");
        let packet = alice_dr.encrypt(text.as_bytes(), "alice-device", 1)?;
        let plain = bob_dr.decrypt(&packet, None)?;
        println!("alice -> bob: {}", String::from_utf8_lossy(&plain));
    }

    for i in 0..5 {
        let text = format!("bob replies #{i}");
        let packet = bob_dr.encrypt(text.as_bytes(), "bob-device", 1)?;
        let plain = alice_dr.decrypt(&packet, None)?;
        println!("bob -> alice: {}", String::from_utf8_lossy(&plain));
    }

    println!(
        "done: alice sent {} messages, bob sent {} messages",
        alice_dr.ns_total(),
        bob_dr.ns_total()
    );
    Ok(())
}
