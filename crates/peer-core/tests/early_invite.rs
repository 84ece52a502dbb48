//! Early-invite reporting: exactly-once, timing, and snapshot consistency

mod common;

use std::time::Duration;

use common::{connecting_transport, core_for, RecordingCall, REMOTE_ANSWER, REMOTE_OFFER};
use pretty_assertions::assert_eq;
use rtcpeer_core::ice::{CandidateType, GatheringState};
use rtcpeer_core::{
    ConnectionState, LocalDescriptionState, MediaConfig, MediaKind, NegotiationConfig,
    NegotiationEvent, NegotiationRole, NegotiationSession, RemoteDescriptionState,
    SessionDescription,
};
use tokio::time::{sleep, Instant};

async fn run_round(role: NegotiationRole, media: MediaConfig) -> anyhow::Result<()> {
    let transport = connecting_transport();
    let call = RecordingCall::new();
    let core = core_for(&transport, &call);
    let session = NegotiationSession::new(role);

    let mut config = NegotiationConfig::new().with_media(media);
    if role == NegotiationRole::Answerer {
        config = config.with_remote_sdp(REMOTE_OFFER);
    }

    let completion = core.launch(&session, config).await?;
    assert_eq!(call.report_count(), 1, "{role} {media:?}: reported once by launch");

    if role == NegotiationRole::Offerer {
        core.on_remote_sdp(&session, SessionDescription::answer(REMOTE_ANSWER)).await?;
    }
    completion.wait().await?;

    // Let the rest of gathering play out
    sleep(Duration::from_secs(1)).await;

    let reports = call.reports();
    assert_eq!(reports.len(), 1, "{role} {media:?}: more than one report");
    assert_eq!(reports[0].role, role);
    assert_eq!(reports[0].round, 1);
    assert_eq!(
        reports[0].description.media_section_count(),
        media.transceivers().len()
    );
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(session.ice_gathering_state(), GatheringState::Complete);
    assert_eq!(session.candidate_count(), 3);

    core.stop(&session).await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reports_exactly_once_for_every_media_and_role() -> anyhow::Result<()> {
    for role in [NegotiationRole::Offerer, NegotiationRole::Answerer] {
        for media in [
            MediaConfig::audio_only(),
            MediaConfig::video_only(),
            MediaConfig::audio_video(),
        ] {
            run_round(role, media).await?;
        }
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reports_before_gathering_completes() {
    let transport = connecting_transport();
    let call = RecordingCall::new();
    let core = core_for(&transport, &call);
    let session = NegotiationSession::offerer();

    let started = Instant::now();
    let completion = core
        .launch(&session, NegotiationConfig::new().with_media(MediaConfig::audio_video()))
        .await
        .unwrap();

    // Reported before the first server-reflexive candidate (150 ms)
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(session.local_description_state(), LocalDescriptionState::Ready);
    assert_eq!(session.ice_gathering_state(), GatheringState::Gathering);
    assert!(session.sdp_ready_reported());

    let reports = call.reports();
    let report = &reports[0];
    assert!(report.candidates.len() >= 1);
    assert!(report
        .candidates
        .candidates()
        .iter()
        .any(|c| c.candidate_type == CandidateType::Host));
    assert_eq!(report.candidate_lines().len(), report.candidates.len());

    core.on_remote_sdp(&session, SessionDescription::answer(REMOTE_ANSWER))
        .await
        .unwrap();
    assert_eq!(session.local_description_state(), LocalDescriptionState::Applied);
    assert_eq!(session.remote_description_state(), RemoteDescriptionState::Applied);
    completion.wait().await.unwrap();

    sleep(Duration::from_secs(1)).await;
    assert!(report.candidates.len() < session.candidate_count());
    assert_eq!(call.report_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn snapshot_stays_a_prefix_of_the_candidate_list() {
    let transport = connecting_transport();
    let call = RecordingCall::new();
    let core = core_for(&transport, &call);
    let session = NegotiationSession::offerer();

    core.launch(&session, NegotiationConfig::new()).await.unwrap();
    let reported = call.reports()[0].candidates.clone();

    sleep(Duration::from_secs(1)).await;

    let candidates = session.candidates();
    assert_eq!(candidates.len(), 3);
    assert!(reported.is_prefix_of(&candidates));
    assert_eq!(session.candidate_snapshot(), Some(reported.clone()));
    assert_eq!(session.trickle_candidates(), candidates[reported.len()..].to_vec());
    assert_eq!(
        session
            .trickle_candidates()
            .iter()
            .map(|c| c.candidate_type)
            .collect::<Vec<_>>(),
        vec![CandidateType::ServerReflexive, CandidateType::Relay]
    );
}

#[tokio::test(start_paused = true)]
async fn trickle_candidates_are_published_after_the_report() {
    let transport = connecting_transport();
    let call = RecordingCall::new();
    let core = core_for(&transport, &call);
    let mut events = core.subscribe();
    let session = NegotiationSession::offerer();

    core.launch(&session, NegotiationConfig::new()).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let mut sequence = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.session_id(), session.id());
        match event {
            NegotiationEvent::CandidateGathered { trickle, .. } => {
                sequence.push(if trickle { "trickle" } else { "candidate" })
            }
            NegotiationEvent::LocalSdpReady { round, role, .. } => {
                assert_eq!(round, 1);
                assert_eq!(role, NegotiationRole::Offerer);
                sequence.push("ready");
            }
            NegotiationEvent::GatheringStateChanged { state: GatheringState::Complete, .. } => {
                sequence.push("complete")
            }
            _ => {}
        }
    }

    assert_eq!(sequence, vec!["candidate", "ready", "trickle", "trickle", "complete"]);
}

#[tokio::test(start_paused = true)]
async fn answerer_applies_the_offer_before_answering() {
    let transport = connecting_transport();
    let call = RecordingCall::new();
    let core = core_for(&transport, &call);
    let session = NegotiationSession::answerer();

    core.start(
        &session,
        NegotiationConfig::new()
            .with_media(MediaConfig::audio_video())
            .with_remote_sdp(REMOTE_OFFER),
    )
    .await
    .unwrap();

    assert_eq!(transport.remote_description().unwrap().sdp, REMOTE_OFFER);
    let reports = call.reports();
    let report = &reports[0];
    assert_eq!(report.role, NegotiationRole::Answerer);
    assert_eq!(report.description.sdp_type, rtcpeer_core::SdpType::Answer);
    assert_eq!(
        transport.transceivers().iter().map(|(kind, _)| *kind).collect::<Vec<_>>(),
        vec![MediaKind::Audio, MediaKind::Video]
    );
    assert_eq!(
        call.states(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_start_does_not_cancel_negotiation() {
    let transport = connecting_transport();
    let call = RecordingCall::new();
    let core = core_for(&transport, &call);
    let session = NegotiationSession::offerer();

    let handle = {
        let core = core.clone();
        let session = session.clone();
        tokio::spawn(async move { core.start(&session, NegotiationConfig::new()).await })
    };

    call.wait_for_reports(1).await;
    handle.abort();

    core.on_remote_sdp(&session, SessionDescription::answer(REMOTE_ANSWER))
        .await
        .unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(call.report_count(), 1);
}
