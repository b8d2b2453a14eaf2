//! Acquisition timing from the rig's sync recording.
//!
//! The sync DAQ samples a bit field of digital lines and stores one
//! `(counter, event bits)` pair per change. Line 5 carries the stimulus
//! trigger: its single rising edge marks the acquisition start, its single
//! falling edge the end.

// External crates
use chrono::{NaiveDateTime, TimeDelta};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Digital line wired to the stimulus trigger.
pub const STIMULUS_TRIGGER_LINE: u32 = 5;

/// Errors locating or decoding a sync recording.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No sync file in the session directory.
    #[error("no sync file (*.h5) in {0:?}")]
    NotFound(PathBuf),
    /// The given line has no rising or no falling edge.
    #[error("could not pull rising or falling edge from line {0} in sync file")]
    MissingEdges(u32),
    /// The trigger line toggled more than once.
    #[error(
        "multiple rising or falling edges detected on line {line} ({rising} rising, {falling} falling)"
    )]
    MultipleEdges {
        line: u32,
        rising: usize,
        falling: usize,
    },
    /// The recording metadata could not be parsed.
    #[error("invalid sync metadata: {0}")]
    Metadata(String),
    /// The recording could not be read.
    #[error("failed to read sync file {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },
    /// A sample time does not fit in a timestamp.
    #[error("edge time {0}s does not fit the acquisition clock")]
    OutOfRange(f64),
    /// Built without the `hdf5` feature.
    #[error(
        "reading sync files needs a `rig` (or `hdf5`) build; pass --start-time and --end-time instead"
    )]
    Unsupported,
}

/// Window during which the mesoscope acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionWindow {
    /// First sample of the acquisition.
    pub start: NaiveDateTime,
    /// Last sample of the acquisition.
    pub end: NaiveDateTime,
}

/// Decoded sync recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDataset {
    /// Wall-clock time of the first sample.
    pub start_time: NaiveDateTime,
    /// Counter ticks per second.
    pub sample_freq: f64,
    /// `(counter, event bits)` per sample.
    pub samples: Vec<(u64, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Rising,
    Falling,
}

impl SyncDataset {
    fn edges(&self, line: u32, kind: Edge) -> Vec<f64> {
        let bit = |events: u32| (events >> line) & 1;
        self.samples
            .windows(2)
            .filter_map(|pair| {
                let (before, after) = (bit(pair[0].1), bit(pair[1].1));
                let hit = match kind {
                    Edge::Rising => before == 0 && after == 1,
                    Edge::Falling => before == 1 && after == 0,
                };
                hit.then(|| pair[1].0 as f64 / self.sample_freq)
            })
            .collect()
    }

    /// Times (seconds since recording start) at which `line` goes high.
    pub fn rising_edges(&self, line: u32) -> Vec<f64> {
        self.edges(line, Edge::Rising)
    }

    /// Times (seconds since recording start) at which `line` goes low.
    pub fn falling_edges(&self, line: u32) -> Vec<f64> {
        self.edges(line, Edge::Falling)
    }

    /// Start and end of acquisition from the stimulus trigger line.
    pub fn acquisition_window(&self) -> Result<AcquisitionWindow, SyncError> {
        let line = STIMULUS_TRIGGER_LINE;
        let rising = self.rising_edges(line);
        let falling = self.falling_edges(line);

        if rising.is_empty() || falling.is_empty() {
            return Err(SyncError::MissingEdges(line));
        }
        if rising.len() > 1 || falling.len() > 1 {
            return Err(SyncError::MultipleEdges {
                line,
                rising: rising.len(),
                falling: falling.len(),
            });
        }

        Ok(AcquisitionWindow {
            start: offset(self.start_time, rising[0])?,
            end: offset(self.start_time, falling[0])?,
        })
    }
}

fn offset(start: NaiveDateTime, seconds: f64) -> Result<NaiveDateTime, SyncError> {
    if !seconds.is_finite() {
        return Err(SyncError::OutOfRange(seconds));
    }
    let micros = (seconds * 1_000_000.0).round() as i64;
    start
        .checked_add_signed(TimeDelta::microseconds(micros))
        .ok_or(SyncError::OutOfRange(seconds))
}

/// The sync recording of a session: the first `*.h5` directly in the session
/// directory that is not a full-field capture.
pub fn find_sync_file(data_directory: &Path) -> Result<PathBuf, SyncError> {
    let read_err = |e: std::io::Error| SyncError::Read {
        path: data_directory.to_path_buf(),
        reason: e.to_string(),
    };

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(data_directory)
        .map_err(read_err)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| SYNC_FILE_PATTERN.matches(n))
        })
        .filter(|p| !p.to_string_lossy().contains("full_field"))
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::NotFound(data_directory.to_path_buf()))
}

static SYNC_FILE_PATTERN: LazyLock<glob::Pattern> = LazyLock::new(|| {
    glob::Pattern::new("*.h5").unwrap_or_else(|e| unreachable!("static sync file pattern: {e}"))
});

static START_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]start_time['"]\s*:\s*(?:datetime\.datetime\(([\d,\s]+)\)|['"]([^'"]+)['"])"#)
        .unwrap_or_else(|e| unreachable!("static sync start_time pattern: {e}"))
});

static FREQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]counter_output_freq['"]\s*:\s*([0-9.eE+-]+)"#)
        .unwrap_or_else(|e| unreachable!("static sync frequency pattern: {e}"))
});

/// Start time and sample frequency from the recording's `meta` attribute,
/// a Python dict literal written by the sync acquisition software.
pub fn parse_sync_meta(meta: &str) -> Result<(NaiveDateTime, f64), SyncError> {
    let caps = START_TIME_RE
        .captures(meta)
        .ok_or_else(|| SyncError::Metadata("start_time missing".to_string()))?;

    let start_time = if let Some(parts) = caps.get(1) {
        datetime_from_constructor(parts.as_str())?
    } else {
        let raw = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .ok_or_else(|| SyncError::Metadata(format!("unparseable start_time {raw:?}")))?
    };

    let freq: f64 = FREQ_RE
        .captures(meta)
        .and_then(|c| c.get(1))
        .ok_or_else(|| SyncError::Metadata("counter_output_freq missing".to_string()))?
        .as_str()
        .parse()
        .map_err(|e| SyncError::Metadata(format!("counter_output_freq: {e}")))?;

    if freq <= 0.0 {
        return Err(SyncError::Metadata(format!("counter_output_freq {freq} is not positive")));
    }

    Ok((start_time, freq))
}

/// `datetime.datetime(2023, 1, 1, 12, 0, 0, 500)` argument list.
fn datetime_from_constructor(args: &str) -> Result<NaiveDateTime, SyncError> {
    let nums: Vec<u32> = args
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| SyncError::Metadata(format!("start_time: {e}")))?;

    let get = |i: usize| nums.get(i).copied().unwrap_or(0);
    chrono::NaiveDate::from_ymd_opt(get(0) as i32, get(1), get(2))
        .and_then(|d| d.and_hms_micro_opt(get(3), get(4), get(5), get(6)))
        .ok_or_else(|| SyncError::Metadata(format!("invalid start_time {args:?}")))
}

/// Decode a sync recording from disk.
#[cfg(feature = "hdf5")]
pub fn read_sync_file(path: &Path) -> Result<SyncDataset, SyncError> {
    crate::sync::hdf5_reader::read(path)
}

/// Always [`SyncError::Unsupported`] without the `hdf5` feature.
#[cfg(not(feature = "hdf5"))]
pub fn read_sync_file(_path: &Path) -> Result<SyncDataset, SyncError> {
    Err(SyncError::Unsupported)
}

/// Acquisition window of the session stored in `data_directory`.
pub fn get_start_end_times(data_directory: &Path) -> Result<AcquisitionWindow, SyncError> {
    let sync_file = find_sync_file(data_directory)?;
    tracing::debug!(sync_file = %sync_file.display(), "Parsing sync file for start and end times");
    read_sync_file(&sync_file)?.acquisition_window()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const TRIGGER: u32 = 1 << STIMULUS_TRIGGER_LINE;

    fn dataset(samples: Vec<(u64, u32)>) -> SyncDataset {
        SyncDataset {
            start_time: NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            sample_freq: 100_000.0,
            samples,
        }
    }

    #[test]
    fn edges_are_reported_at_the_changing_sample() {
        let d = dataset(vec![
            (0, 0),
            (100_000, TRIGGER | 1),
            (150_000, TRIGGER),
            (400_000, 0),
        ]);

        assert_eq!(d.rising_edges(STIMULUS_TRIGGER_LINE), vec![1.0]);
        assert_eq!(d.falling_edges(STIMULUS_TRIGGER_LINE), vec![4.0]);
        assert_eq!(d.rising_edges(0), vec![1.0]);
        assert_eq!(d.falling_edges(0), vec![1.5]);
    }

    #[test]
    fn window_is_offset_from_recording_start() {
        let d = dataset(vec![(0, 0), (250_000, TRIGGER), (360_050_000, 0)]);
        let window = d.acquisition_window().unwrap();

        let base = d.start_time;
        assert_eq!(window.start, base + TimeDelta::milliseconds(2_500));
        assert_eq!(window.end, base + TimeDelta::microseconds(3_600_500_000));
    }

    #[test]
    fn missing_edges_are_an_error() {
        let d = dataset(vec![(0, 0), (10, 0)]);
        assert!(matches!(d.acquisition_window(), Err(SyncError::MissingEdges(5))));

        let only_rising = dataset(vec![(0, 0), (10, TRIGGER)]);
        assert!(matches!(only_rising.acquisition_window(), Err(SyncError::MissingEdges(5))));
    }

    #[test]
    fn repeated_trigger_is_an_error() {
        let d = dataset(vec![(0, 0), (10, TRIGGER), (20, 0), (30, TRIGGER), (40, 0)]);
        assert!(matches!(
            d.acquisition_window(),
            Err(SyncError::MultipleEdges { rising: 2, falling: 2, .. })
        ));
    }

    #[test]
    fn meta_with_string_start_time() {
        let meta = "{'ni_daq': {'device': 'Dev1', 'counter_output_freq': 100000.0}, \
                    'start_time': '2023-01-01 12:00:00.250000', 'stop_time': '2023-01-01 13:00:00'}";
        let (start, freq) = parse_sync_meta(meta).unwrap();
        assert_eq!(freq, 100_000.0);
        assert_eq!(
            start,
            NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_milli_opt(12, 0, 0, 250)
                .unwrap()
        );
    }

    #[test]
    fn meta_with_datetime_constructor() {
        let meta = "{'start_time': datetime.datetime(2024, 5, 14, 8, 13, 2, 500), \
                    'ni_daq': {'counter_output_freq': 1e5}}";
        let (start, freq) = parse_sync_meta(meta).unwrap();
        assert_eq!(freq, 100_000.0);
        assert_eq!(
            start,
            NaiveDate::from_ymd_opt(2024, 5, 14)
                .unwrap()
                .and_hms_micro_opt(8, 13, 2, 500)
                .unwrap()
        );
    }

    #[test]
    fn meta_without_frequency_is_rejected() {
        assert!(matches!(
            parse_sync_meta("{'start_time': '2023-01-01 12:00:00'}"),
            Err(SyncError::Metadata(_))
        ));
    }

    #[test]
    fn full_field_recordings_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1_full_field.h5"), b"").unwrap();
        std::fs::write(dir.path().join("1_sync.h5"), b"").unwrap();

        let found = find_sync_file(dir.path()).unwrap();
        assert!(found.ends_with("1_sync.h5"));
    }

    #[test]
    fn no_sync_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(find_sync_file(dir.path()), Err(SyncError::NotFound(_))));
    }
}
