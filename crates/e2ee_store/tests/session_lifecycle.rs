//! End-to-end scenarios spanning vault, device bundle, and contact store
//! together — the thing no single module's unit tests exercise, since
//! each of those colocated suites stops at its own crate boundary.

use anyhow::Result;

use e2ee_crypto::mk::ArgonParams;
use e2ee_crypto::prekey::DevicePrivateBundle;
use e2ee_crypto::ratchet::DrState;
use e2ee_crypto::x3dh;
use e2ee_store::contacts::ContactSecretsStore;
use e2ee_store::device_bundle::DeviceBundleStore;
use e2ee_store::models::{ContactSecretPatch, Role};
use e2ee_store::vault::VaultCell;

fn account_dir(label: &str) -> String {
    std::env::temp_dir()
        .join(format!("e2ee-store-it-{label}-{}", uuid::Uuid::new_v4()))
        .to_str()
        .unwrap()
        .to_string()
}

fn fast_params() -> ArgonParams {
    ArgonParams { m: 8, t: 1, p: 1 }
}

/// Two accounts, each with its own on-disk footprint, complete X3DH and
/// exchange messages through real `DeviceBundleStore`/`ContactSecretsStore`
/// instances — no in-memory shortcuts.
#[test]
fn full_handshake_and_exchange_across_independent_accounts() -> Result<()> {
    let alice_dir = account_dir("alice");
    let bob_dir = account_dir("bob");

    let alice_vault = VaultCell::new();
    let alice_envelope = alice_vault.create("alice-pw", fast_params())?;
    let alice_devices = DeviceBundleStore::open(&alice_dir)?;
    let alice_bundle = DevicePrivateBundle::generate_initial("alice-device", 0, 2);
    alice_devices.save(&alice_bundle, &alice_vault, 1_000)?;

    let bob_vault = VaultCell::new();
    let bob_envelope = bob_vault.create("bob-pw", fast_params())?;
    let bob_devices = DeviceBundleStore::open(&bob_dir)?;
    let mut bob_bundle = DevicePrivateBundle::generate_initial("bob-device", 0, 2);
    let bob_opk = bob_bundle.next_available_opk_id();
    bob_devices.save(&bob_bundle, &bob_vault, 1_000)?;

    // Alice fetches Bob's published bundle (out of band) and initiates.
    let bob_published = bob_bundle.published(bob_opk);
    let material = x3dh::initiate(&alice_bundle, &bob_published)?;
    let header = material.header.clone();
    let mut alice_dr = DrState::from_initiator(material);

    let alice_contacts = ContactSecretsStore::open(&alice_dir)?;
    alice_contacts.hydrate()?;
    alice_contacts.set(
        "bob",
        ContactSecretPatch { role: Some(Role::Guest), dr_state: Some(alice_dr.snapshot()), ..Default::default() },
    )?;
    alice_contacts.persist()?;

    // Bob responds, consuming the OPK Alice's header names.
    let resp = x3dh::respond(&mut bob_bundle, &header)?;
    bob_devices.save(&bob_bundle, &bob_vault, 2_000)?;
    let mut bob_dr = DrState::from_responder(resp);

    let bob_contacts = ContactSecretsStore::open(&bob_dir)?;
    bob_contacts.hydrate()?;
    bob_contacts.set(
        "alice",
        ContactSecretPatch { role: Some(Role::Owner), dr_state: Some(bob_dr.snapshot()), ..Default::default() },
    )?;
    bob_contacts.persist()?;

    let pkt = alice_dr.encrypt(b"hello from alice", "alice-device", 1)?;
    alice_contacts.set("bob", ContactSecretPatch { dr_state: Some(alice_dr.snapshot()), ..Default::default() })?;
    alice_contacts.persist()?;

    let plain = bob_dr.decrypt(&pkt, None)?;
    assert_eq!(plain, b"hello from alice");

    // Round-trip Bob's device bundle through a brand-new process-like
    // handle to confirm the consumed OPK really persisted.
    let bob_devices_again = DeviceBundleStore::open(&bob_dir)?;
    let bob_vault_again = VaultCell::new();
    bob_vault_again.unlock("bob-pw", &bob_envelope)?;
    let reloaded_bob = bob_devices_again.load(&bob_vault_again)?;
    assert_eq!(reloaded_bob.opk_count(), 1, "exactly one OPK consumed by the responder side");

    let alice_vault_again = VaultCell::new();
    alice_vault_again.unlock("alice-pw", &alice_envelope)?;
    assert!(alice_vault_again.is_unlocked());

    Ok(())
}

/// Logout/restart: a fresh `ContactSecretsStore` handle for the same
/// account digest must recover the persisted session after `hydrate`,
/// and the restoring side must force a send-chain rotation before it
/// can safely reply.
#[test]
fn session_survives_restart_and_requires_explicit_rotation() -> Result<()> {
    let dir = account_dir("restart");

    let mut bob = DevicePrivateBundle::generate_initial("bob", 0, 1);
    let alice = DevicePrivateBundle::generate_initial("alice", 0, 0);
    let bob_published = bob.published(bob.next_available_opk_id());
    let init = x3dh::initiate(&alice, &bob_published)?;
    let header = init.header.clone();
    let mut alice_dr = DrState::from_initiator(init);
    let resp = x3dh::respond(&mut bob, &header)?;
    let mut bob_dr = DrState::from_responder(resp);

    for i in 0..5 {
        let pkt = alice_dr.encrypt(format!("m{i}").as_bytes(), "alice-device", 1)?;
        bob_dr.decrypt(&pkt, None)?;
    }

    let store1 = ContactSecretsStore::open(&dir)?;
    store1.set(
        "alice",
        ContactSecretPatch { role: Some(Role::Owner), dr_state: Some(bob_dr.snapshot()), ..Default::default() },
    )?;
    store1.persist()?;
    drop(store1);

    // Simulate a new process: fresh store, nothing carried over but disk.
    let store2 = ContactSecretsStore::open(&dir)?;
    store2.hydrate()?;
    let record = store2.get("alice").expect("session persisted across restart");
    let snapshot = record.dr_state.expect("dr state persisted");
    assert_eq!(snapshot.nr_total, 5);

    let mut restored = DrState::restore(&snapshot)?;
    restored.force_next_send_rotation();
    let reply = restored.encrypt(b"post-restart reply", "bob-device", 1)?;
    let plain = alice_dr.decrypt(&reply, None)?;
    assert_eq!(plain, b"post-restart reply");

    Ok(())
}

/// A locked store rejects further writes but the contacts already
/// persisted remain readable through `get`.
#[test]
fn locking_a_store_blocks_writes_but_not_reads() -> Result<()> {
    let dir = account_dir("lock");
    let store = ContactSecretsStore::open(&dir)?;
    store.set("peer-a", ContactSecretPatch { role: Some(Role::Guest), ..Default::default() })?;
    store.persist()?;

    store.lock("user logged out");
    assert!(store.get("peer-a").is_some());
    assert!(store.set("peer-a", ContactSecretPatch { secret: Some("x".into()), ..Default::default() }).is_err());
    assert!(store.persist().is_err());

    Ok(())
}
