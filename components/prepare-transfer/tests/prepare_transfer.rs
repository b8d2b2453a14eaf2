//! End-to-end runs over a dummy session directory.

mod common;

use std::fs;
use std::path::PathBuf;

use common::{DummyRig, window};
use meso_prepare_transfer::manifest::manifest::ManifestConfig;
use meso_prepare_transfer::runtime::runtime::{
    DatasetError, LEARNING_MFISH_PROJECT, OPENSCOPE_PROJECT, SessionRequest, TimingSource,
    process_dataset,
};
use meso_prepare_transfer::schema::data_description::RawDataDescription;
use meso_prepare_transfer::schema::session::Session;

fn request(session_id: &str) -> SessionRequest {
    SessionRequest {
        username: "User Name".to_string(),
        session_id: session_id.to_string(),
    }
}

fn read_manifest(path: &PathBuf) -> ManifestConfig {
    serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn processes_sessions_of_every_project() {
    let projects = [
        ("1234567890", "614173", "LearningmFISHTask1A", LEARNING_MFISH_PROJECT),
        ("1234567891", "614174", "LearningmFISHDevelopment", LEARNING_MFISH_PROJECT),
        ("1234567892", "614175", "OpenScopeGlobalLocalOddball", OPENSCOPE_PROJECT),
    ];

    for (session_id, subject_id, project_code, expected_project) in projects {
        let rig = DummyRig::new();
        rig.add_session(session_id, subject_id, project_code);

        let processed = process_dataset(
            &request(session_id),
            &rig.settings,
            &TimingSource::Explicit(window()),
        )
        .unwrap();

        let session_dir = rig.session_dir(session_id);
        assert_eq!(processed.project_name, expected_project);
        assert_eq!(processed.platform.subject_id, subject_id);

        let session: Session =
            serde_json::from_str(&fs::read_to_string(session_dir.join("session.json")).unwrap())
                .unwrap();
        assert_eq!(session.subject_id, subject_id);
        assert_eq!(session.experimenter_full_name, vec!["User Name".to_string()]);
        assert_eq!(session.session_start_time, window().start);
        assert_eq!(
            session.data_streams[0].camera_names,
            vec!["Behavior", "Eye", "Face", "Nose"]
        );

        let description: RawDataDescription = serde_json::from_str(
            &fs::read_to_string(session_dir.join("data_description.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(description.project_name.as_deref(), Some(expected_project));
        assert_eq!(description.data_summary.as_deref(), Some(project_code));
        assert_eq!(
            description.name,
            format!("multiplane-ophys_{subject_id}_2025-06-15_12-00-00")
        );

        let csv = fs::read_to_string(session_dir.join("data_description.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);

        let manifests = rig.manifests();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0], processed.manifest_file);

        let manifest = read_manifest(&manifests[0]);
        assert_eq!(
            manifest.modalities.keys().collect::<Vec<_>>(),
            rig.settings.modalities.keys().collect::<Vec<_>>()
        );
        assert_eq!(manifest.project_name, expected_project);
        assert_eq!(
            manifest.extra_identifying_info.get("ophys_session_id").map(String::as_str),
            Some(session_id)
        );
        for schema in ["session.json", "data_description.json"] {
            let expected = session_dir.join(schema).to_string_lossy().into_owned();
            assert!(manifest.schemas.contains(&expected), "{schema} missing from schemas");
        }
    }
}

#[test]
fn manifest_lists_files_per_modality() {
    let rig = DummyRig::new();
    rig.add_session("1234567890", "614173", "LearningmFISHTask1A");

    let processed = process_dataset(
        &request("1234567890"),
        &rig.settings,
        &TimingSource::Explicit(window()),
    )
    .unwrap();
    let manifest = read_manifest(&processed.manifest_file);

    let behavior = &manifest.modalities["behavior"];
    assert_eq!(behavior.len(), 3);
    assert!(behavior.iter().any(|f| f.ends_with("1234567890_sync.h5")));

    let pophys = &manifest.modalities["pophys"];
    assert!(pophys.iter().any(|f| f.ends_with("1234567890_platform.json")));
    assert!(pophys.iter().any(|f| f.contains("sorted_local_z_stacks")));
    assert!(!pophys.iter().any(|f| f.ends_with("session_finalize.pkl")));

    assert_eq!(manifest.modalities["behavior-videos"].len(), 8);
}

#[test]
fn behavior_videos_of_other_sessions_are_left_out() {
    let rig = DummyRig::new();
    rig.add_session("1234567890", "614173", "LearningmFISHTask1A");
    rig.add_session("1234567899", "614173", "LearningmFISHTask1A");

    let processed = process_dataset(
        &request("1234567890"),
        &rig.settings,
        &TimingSource::Explicit(window()),
    )
    .unwrap();
    let manifest = read_manifest(&processed.manifest_file);

    let videos = &manifest.modalities["behavior-videos"];
    assert_eq!(videos.len(), 8);
    assert!(videos.iter().all(|f| f.contains("1234567890")));
}

#[test]
fn session_without_camera_files_fails() {
    let rig = DummyRig::new();
    rig.add_session("1234567890", "614173", "LearningmFISHTask1A");
    for entry in fs::read_dir(&rig.settings.behavior_video_dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "json") {
            fs::remove_file(path).unwrap();
        }
    }

    let result = process_dataset(
        &request("1234567890"),
        &rig.settings,
        &TimingSource::Explicit(window()),
    );

    assert!(matches!(result, Err(DatasetError::NoCameraFiles { .. })));
    assert!(rig.manifests().is_empty());
}

#[test]
fn unknown_project_investigators_fail() {
    let mut rig = DummyRig::new();
    rig.settings.investigators.remove("OpenScope");
    rig.add_session("1234567892", "614175", "OpenScopeGlobalLocalOddball");

    let result = process_dataset(
        &request("1234567892"),
        &rig.settings,
        &TimingSource::Explicit(window()),
    );

    assert!(matches!(result, Err(DatasetError::MissingInvestigators(p)) if p == "OpenScope"));
    let session_dir = rig.session_dir("1234567892");
    assert!(!session_dir.join("session.json").exists());
    assert!(!session_dir.join("data_description.json").exists());
    assert!(!session_dir.join("data_description.csv").exists());
    assert!(rig.manifests().is_empty());
}

#[cfg(not(feature = "hdf5"))]
#[test]
fn sync_timing_needs_hdf5_support() {
    let rig = DummyRig::new();
    rig.add_session("1234567890", "614173", "LearningmFISHTask1A");

    let result = process_dataset(&request("1234567890"), &rig.settings, &TimingSource::SyncFile);

    let message = match result {
        Err(DatasetError::Sync(e)) => e.to_string(),
        _ => panic!("expected a sync error"),
    };
    assert!(message.contains("`rig`"), "{message}");
    assert!(message.contains("--start-time"), "{message}");
    assert!(rig.manifests().is_empty());
}
