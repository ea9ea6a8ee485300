//! Integration-Tests: mehrere Session-Controller auf einer gemeinsamen Liste

use std::sync::Arc;
use voicemesh_audio::{DspConfig, SyntheticCapture, SyntheticFailure};
use voicemesh_core::{SessionEvent, UserId};
use voicemesh_directory::{DirectoryClient, InMemoryList};
use voicemesh_mesh::{
    LoopbackNetwork, MediaAcquirer, PhaseKind, SessionController, SessionIdentity,
};
use voicemesh_observability::MeshMetrics;

struct Netz {
    list: InMemoryList,
    loopback: LoopbackNetwork,
}

impl Netz {
    fn neu() -> Self {
        Self {
            list: InMemoryList::new(),
            loopback: LoopbackNetwork::new(),
        }
    }

    fn client(&self) -> DirectoryClient {
        DirectoryClient::new(Arc::new(self.list.clone()))
    }

    fn teilnehmer(&self, user: &str, capture: Arc<SyntheticCapture>) -> SessionController {
        SessionController::new(
            SessionIdentity {
                user_id: UserId::from(user),
                display_name: user.to_uppercase(),
            },
            DspConfig::default(),
            self.client(),
            Arc::new(self.loopback.transport()),
            MediaAcquirer::new(capture, None),
            MeshMetrics::neu().unwrap(),
        )
    }
}

fn runden(controller: &mut [&mut SessionController], n: usize) {
    for _ in 0..n {
        for c in controller.iter_mut() {
            c.tick();
        }
    }
}

fn rauschen(n: usize) -> Vec<f32> {
    let mut seed = 11u32;
    (0..n)
        .map(|_| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            ((seed >> 16) as f32 / 32768.0 - 1.0) * 0.5
        })
        .collect()
}

#[tokio::test]
async fn zwei_teilnehmer_verbinden_sich() {
    let netz = Netz::neu();
    let mut alice = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;

    runden(&mut [&mut alice, &mut bob], 3);

    let a_sid = alice.session_id().cloned().unwrap();
    let b_sid = bob.session_id().cloned().unwrap();
    assert_eq!(alice.peers().len(), 1);
    assert_eq!(alice.peers()[0].peer_id, b_sid);
    assert!(alice.peers()[0].is_connected);
    assert_eq!(bob.peers()[0].peer_id, a_sid);
    assert!(bob.peers()[0].is_connected);
    assert_eq!(bob.peers()[0].peer_name, "ALICE");
    assert!(alice.remote_stream(&b_sid).is_some());
    assert_eq!(alice.metrics().connected_peers.get(), 1);

    // Genau eine Seite hat initiiert
    let a_init = alice.manager().connection(&b_sid).unwrap().is_initiator();
    let b_init = bob.manager().connection(&a_sid).unwrap().is_initiator();
    assert_ne!(a_init, b_init);
    assert_eq!(a_init, a_sid > b_sid);
}

#[tokio::test]
async fn drei_teilnehmer_vollvermascht() {
    let netz = Netz::neu();
    let mut a = netz.teilnehmer("a", Arc::new(SyntheticCapture::new()));
    let mut b = netz.teilnehmer("b", Arc::new(SyntheticCapture::new()));
    let mut c = netz.teilnehmer("c", Arc::new(SyntheticCapture::new()));
    a.join().await;
    b.join().await;
    c.join().await;

    runden(&mut [&mut a, &mut b, &mut c], 3);

    for t in [&a, &b, &c] {
        assert_eq!(t.peers().len(), 2);
        assert!(t.peers().iter().all(|p| p.is_connected));
    }
    assert_eq!(netz.loopback.link_count(), 6);
}

#[tokio::test]
async fn leave_ist_idempotent() {
    let netz = Netz::neu();
    let dir = netz.client();
    let mut alice = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));

    // Leave im Idle: keine Aenderung, keine Ereignisse
    let mut aenderungen = dir.subscribe();
    let mut events = alice.subscribe_events();
    alice.leave();
    assert!(aenderungen.try_recv().is_err());
    assert!(events.try_recv().is_err());

    alice.join().await;
    alice.leave();
    assert!(dir.entries().is_empty());
    while aenderungen.try_recv().is_ok() {}
    while events.try_recv().is_ok() {}

    alice.leave();
    assert_eq!(alice.phase(), PhaseKind::Idle);
    assert!(aenderungen.try_recv().is_err());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn leave_gibt_alles_frei() {
    let netz = Netz::neu();
    let capture = Arc::new(SyntheticCapture::new());
    let mut alice = netz.teilnehmer("alice", capture.clone());
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;
    runden(&mut [&mut alice, &mut bob], 3);

    let b_sid = bob.session_id().cloned().unwrap();
    let remote = alice.remote_stream(&b_sid).cloned().unwrap();
    let lokal = capture.last_stream().unwrap();

    alice.leave();
    assert!(!lokal.is_active());
    assert!(!remote.is_active());
    assert!(alice.peers().is_empty());
    assert_eq!(alice.manager().connection_count(), 0);
    assert_eq!(netz.client().entries().len(), 1);

    // Bob bemerkt den Abgang beim naechsten Abgleich
    let mut events = bob.subscribe_events();
    bob.tick();
    assert!(bob.peers().is_empty());
    assert!(std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, SessionEvent::PeerLeft { .. })));
}

#[tokio::test]
async fn kein_doppelter_eintrag_nach_absturz() {
    let netz = Netz::neu();
    let dir = netz.client();

    let mut erste = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    erste.join().await;
    let alte_sid = erste.session_id().cloned().unwrap();
    // Absturz: kein leave, der Eintrag bleibt liegen
    drop(erste);
    assert_eq!(dir.entries().len(), 1);

    let mut zweite = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    zweite.join().await;

    let alice: Vec<_> = dir
        .entries()
        .into_iter()
        .filter(|o| o.entry.user_id.as_str() == "alice")
        .collect();
    assert_eq!(alice.len(), 1);
    assert_ne!(alice[0].entry.session_id, alte_sid);
    assert_eq!(zweite.metrics().stale_entries_removed.get(), 1);
}

#[tokio::test]
async fn selbstheilung_innerhalb_eines_abgleichs() {
    let netz = Netz::neu();
    let dir = netz.client();
    let mut alice = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;
    runden(&mut [&mut alice, &mut bob], 3);

    let sid = alice.session_id().cloned().unwrap();
    let mut events = alice.subscribe_events();
    dir.remove_session(&sid);
    assert!(dir.find_session(&sid).is_none());

    alice.tick();
    let eintrag = dir.find_session(&sid).expect("Eintrag muss wieder da sein");
    assert_eq!(eintrag.entry_ref, alice.local_session().unwrap().entry_ref);
    assert!(std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| e == SessionEvent::SelfHealed { session_id: sid.clone() }));
    assert_eq!(alice.metrics().self_heals.get(), 1);

    // Verbindung ueberlebt die Neuveroeffentlichung
    runden(&mut [&mut alice, &mut bob], 2);
    assert!(bob.peers()[0].is_connected);
    assert!(alice.peers()[0].is_connected);
}

#[tokio::test]
async fn mute_und_deafen_fuer_peers_sichtbar() {
    let netz = Netz::neu();
    let mut alice = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;
    runden(&mut [&mut alice, &mut bob], 3);

    alice.toggle_deafen();
    bob.tick();
    assert!(bob.peers()[0].is_muted);
    assert!(bob.peers()[0].is_deafened);

    // Mute waehrend Deafen: veroeffentlicht bleibt stumm
    alice.toggle_mute();
    alice.toggle_mute();
    bob.tick();
    assert!(bob.peers()[0].is_muted);

    alice.toggle_deafen();
    bob.tick();
    assert!(!bob.peers()[0].is_muted);
    assert!(!bob.peers()[0].is_deafened);

    // Deafen deaktiviert eingehende Streams
    let b_sid = bob.session_id().cloned().unwrap();
    alice.toggle_deafen();
    assert!(!alice.remote_stream(&b_sid).unwrap().audio_track().is_enabled());
    alice.toggle_deafen();
    assert!(alice.remote_stream(&b_sid).unwrap().audio_track().is_enabled());
}

#[tokio::test]
async fn mute_vor_dem_beitritt_wird_veroeffentlicht() {
    let netz = Netz::neu();
    let dir = netz.client();
    let mut alice = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    alice.toggle_mute();
    alice.join().await;
    let sid = alice.session_id().cloned().unwrap();
    assert!(dir.find_session(&sid).unwrap().entry.is_muted);
    assert!(!alice
        .local_session()
        .unwrap()
        .media
        .outbound_track()
        .is_enabled());
}

#[tokio::test]
async fn capture_fehler_veroeffentlicht_nichts() {
    let netz = Netz::neu();
    let capture = Arc::new(SyntheticCapture::new());
    capture.fail_next(SyntheticFailure::NoDevice);
    let mut alice = netz.teilnehmer("alice", capture);
    let mut events = alice.subscribe_events();

    alice.join().await;
    assert_eq!(alice.phase(), PhaseKind::Idle);
    assert!(netz.client().entries().is_empty());
    match events.try_recv().unwrap() {
        SessionEvent::JoinFailed { message } => assert!(message.contains("Mikrofon")),
        other => panic!("JoinFailed erwartet, war {other:?}"),
    }

    // Zweiter Versuch klappt
    alice.join().await;
    assert!(alice.is_connected());
}

#[tokio::test]
async fn fehlerhafte_verbindung_wird_neu_aufgebaut() {
    let netz = Netz::neu();
    let mut alice = netz.teilnehmer("alice", Arc::new(SyntheticCapture::new()));
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;
    runden(&mut [&mut alice, &mut bob], 3);

    let a_sid = alice.session_id().cloned().unwrap();
    let b_sid = bob.session_id().cloned().unwrap();
    netz.loopback.fail_link(&a_sid, &b_sid, "ICE failed");

    alice.tick();
    assert!(!alice.peers()[0].is_connected);
    assert_eq!(alice.metrics().link_failures.get(), 1);

    runden(&mut [&mut alice, &mut bob], 4);
    assert!(alice.peers()[0].is_connected);
    assert!(bob.peers()[0].is_connected);
    assert!(alice.remote_stream(&b_sid).unwrap().is_active());
}

#[tokio::test]
async fn hot_swap_behaelt_verbindungen() {
    let netz = Netz::neu();
    let capture = Arc::new(SyntheticCapture::with_devices(["mic-1", "mic-2"]));
    let mut alice = netz.teilnehmer("alice", capture.clone());
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;
    runden(&mut [&mut alice, &mut bob], 3);

    let a_sid = alice.session_id().cloned().unwrap();
    let bei_bob = bob.remote_stream(&a_sid).cloned().unwrap();
    let alter_stream = capture.last_stream().unwrap();
    let mut events = alice.subscribe_events();

    let mut cfg = alice.dsp_config().clone();
    cfg.input_device_id = Some("mic-2".into());
    alice.apply_dsp_config(cfg).await;

    assert!(!alter_stream.is_active());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::StreamSwapped);

    let neuer_stream = capture.last_stream().unwrap();
    let vorher = bei_bob.audio_track().samples_written();
    neuer_stream.audio_track().write(&[0.25; 480]);
    assert_eq!(bei_bob.audio_track().samples_written(), vorher + 480);

    // Keine Neuverhandlung
    runden(&mut [&mut alice, &mut bob], 1);
    assert!(bob.remote_stream(&a_sid).unwrap() == &bei_bob);
    assert!(alice.peers()[0].is_connected);
}

#[tokio::test]
async fn hot_swap_uebernimmt_mute() {
    let netz = Netz::neu();
    let capture = Arc::new(SyntheticCapture::with_devices(["mic-1", "mic-2"]));
    let mut alice = netz.teilnehmer("alice", capture.clone());
    alice.join().await;
    alice.toggle_mute();

    let mut cfg = alice.dsp_config().clone();
    cfg.input_device_id = Some("mic-2".into());
    alice.apply_dsp_config(cfg).await;
    assert!(!capture.last_stream().unwrap().audio_track().is_enabled());
}

#[tokio::test]
async fn sprechen_wird_beim_peer_erkannt() {
    let netz = Netz::neu();
    let capture = Arc::new(SyntheticCapture::new());
    let mut alice = netz.teilnehmer("alice", capture.clone());
    let mut bob = netz.teilnehmer("bob", Arc::new(SyntheticCapture::new()));
    alice.join().await;
    bob.join().await;
    runden(&mut [&mut alice, &mut bob], 3);

    let a_sid = alice.session_id().cloned().unwrap();
    let mikro = capture.last_stream().unwrap();
    mikro.audio_track().write(&rauschen(2048));

    bob.poll_activity();
    bob.poll_activity();
    let a_view = bob.peers().iter().find(|p| p.peer_id == a_sid).unwrap();
    assert!(a_view.is_speaking);

    alice.poll_activity();
    alice.poll_activity();
    assert!(alice.is_speaking());

    // Stumm geschaltet spricht man nicht
    alice.toggle_mute();
    assert!(!alice.is_speaking());
}
