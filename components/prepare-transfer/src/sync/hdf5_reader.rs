//! HDF5 decoding of sync recordings.
//!
//! Layout: dataset `data` is an `N x 2` table of `(counter, event bits)`,
//! dataset `meta` a string holding the recording's Python dict literal.

// Local crates
use crate::sync::sync::{SyncDataset, SyncError, parse_sync_meta};

// External crates
use hdf5::types::{VarLenAscii, VarLenUnicode};
use std::path::Path;

/// Decode `path` into samples and the recording metadata.
pub fn read(path: &Path) -> Result<SyncDataset, SyncError> {
    let read_err = |e: hdf5::Error| SyncError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let file = hdf5::File::open(path).map_err(read_err)?;

    let meta_ds = file.dataset("meta").map_err(read_err)?;
    let meta = match meta_ds.read_scalar::<VarLenUnicode>() {
        Ok(s) => s.as_str().to_string(),
        Err(_) => meta_ds
            .read_scalar::<VarLenAscii>()
            .map_err(read_err)?
            .as_str()
            .to_string(),
    };
    let (start_time, sample_freq) = parse_sync_meta(&meta)?;

    let data = file.dataset("data").map_err(read_err)?;
    let shape = data.shape();
    if shape.len() != 2 || shape[1] < 2 {
        return Err(SyncError::Read {
            path: path.to_path_buf(),
            reason: format!("unexpected data shape {shape:?}"),
        });
    }
    let columns = shape[1];
    let raw = data.read_raw::<u64>().map_err(read_err)?;

    let samples = unwrap_rollover(samples_from_rows(&raw, columns));

    Ok(SyncDataset {
        start_time,
        sample_freq,
        samples,
    })
}

/// Counter from the first column, event bits from the last one.
fn samples_from_rows(raw: &[u64], columns: usize) -> Vec<(u64, u32)> {
    raw.chunks_exact(columns)
        .filter_map(|row| Some((*row.first()?, *row.last()? as u32)))
        .collect()
}

/// The DAQ counter is 32 bits wide and wraps during long sessions.
fn unwrap_rollover(samples: Vec<(u64, u32)>) -> Vec<(u64, u32)> {
    let mut base = 0u64;
    let mut previous = 0u64;
    samples
        .into_iter()
        .map(|(counter, events)| {
            if counter < previous {
                base += 1 << 32;
            }
            previous = counter;
            (base + counter, events)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_bits_come_from_the_last_column() {
        let raw = [10, 7, 32, 20, 8, 0];
        assert_eq!(samples_from_rows(&raw, 3), vec![(10, 32), (20, 0)]);
        assert_eq!(samples_from_rows(&[10, 32], 2), vec![(10, 32)]);
    }

    #[test]
    fn wrapped_counter_keeps_increasing() {
        let samples = vec![(u32::MAX as u64 - 1, 0), (5, 1), (10, 0)];
        let unwrapped: Vec<u64> = unwrap_rollover(samples).into_iter().map(|s| s.0).collect();
        assert_eq!(unwrapped, vec![u32::MAX as u64 - 1, (1 << 32) + 5, (1 << 32) + 10]);
    }
}
