//! Dummy mesoscope datasets laid out like a rig leaves them.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use meso_prepare_transfer::helpers::load_config::Settings;
use meso_prepare_transfer::sync::sync::AcquisitionWindow;

pub struct DummyRig {
    pub root: tempfile::TempDir,
    pub settings: Settings,
}

impl DummyRig {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings {
            acquisition_dir: root.path().join("scanimage_ophys").join("data"),
            behavior_video_dir: root.path().join("mvr").join("data"),
            manifest_directory: root.path().join("watchdog").join("manifest"),
            logserver_url: String::new(),
            ..Settings::default()
        };
        Self { root, settings }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.settings.session_directory(session_id)
    }

    pub fn manifests(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(&self.settings.manifest_directory)
            .map(|entries| entries.filter_map(Result::ok).map(|e| e.path()).collect())
            .unwrap_or_default();
        found.sort();
        found
    }

    /// Acquisition files, platform.json and behavior videos for one session.
    pub fn add_session(&self, session_id: &str, subject_id: &str, project_code: &str) {
        let session_dir = self.session_dir(session_id);
        touch_all(&session_dir, &acquisition_files(session_id));

        for (folder, files) in acquisition_folders(session_id) {
            touch_all(&session_dir.join(folder), &files);
        }

        fs::write(
            session_dir.join(format!("{session_id}_platform.json")),
            serde_json::json!({ "subject_id": subject_id, "project_code": project_code })
                .to_string(),
        )
        .unwrap();

        touch_all(&self.settings.behavior_video_dir, &behavior_files(session_id));
    }
}

pub fn window() -> AcquisitionWindow {
    AcquisitionWindow {
        start: at(12, 0, 0),
        end: at(13, 5, 30),
    }
}

pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 15)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn touch_all(dir: &Path, files: &[String]) {
    fs::create_dir_all(dir).unwrap();
    for file in files {
        fs::write(dir.join(file), b"").unwrap();
    }
}

fn acquisition_files(session_id: &str) -> Vec<String> {
    [
        ".html",
        "_averaged_depth.tiff",
        "_averaged_surface.tiff",
        "_local_z_stack0.tiff",
        "_local_z_stack1.tiff",
        "_reticle.tif",
        "_stim.pkl",
        "_stim_table.csv",
        "_surface.roi",
        "_sync.h5",
        "_timeseries.roi",
        "_timeseries.tiff",
        "_timeseries_Motion_00001.csv",
        "_timeseries_Motion_Corrected_00001.csv",
        "_vasculature.tif",
        "_vsync_table.csv",
    ]
    .iter()
    .map(|suffix| format!("{session_id}{suffix}"))
    .chain(["lightleak_average.tiff".to_string()])
    .collect()
}

fn acquisition_folders(session_id: &str) -> Vec<(&'static str, Vec<String>)> {
    let parents: Vec<u64> = session_id
        .parse::<u64>()
        .map(|id| (0..3).map(|i| id.saturating_sub(1_000_000) + i).collect())
        .unwrap_or_default();

    vec![
        (
            "depth_2p_images",
            vec![format!("{session_id}_-114.tif"), format!("{session_id}_-29.tif")],
        ),
        (
            "parent_session_depth_images",
            parents.iter().map(|p| format!("{p}_depth.tif")).collect(),
        ),
        (
            "parent_session_surface_images",
            parents.iter().map(|p| format!("{p}_surface.tif")).collect(),
        ),
        (
            "sorted_local_z_stacks",
            vec![
                format!("{session_id}_local_z_stack0_reg_ch_1.tif"),
                format!("{session_id}_local_z_stack0_reg_ch_2.tif"),
            ],
        ),
        ("sessions", vec!["session_finalize.pkl".to_string()]),
    ]
}

fn behavior_files(session_id: &str) -> Vec<String> {
    ["Behavior", "Face", "Eye", "Nose"]
        .iter()
        .flat_map(|camera| {
            ["mp4", "json"]
                .iter()
                .map(move |ext| format!("{session_id}_{camera}_20250615T120000.{ext}"))
        })
        .collect()
}
