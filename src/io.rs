//! Loading of reference and sample traces and export of deconvolution results.
//!
//! Supported inputs are two-column text files (`.csv`, `.tsv`, `.txt`), numpy arrays (`.npy`,
//! 2xN or Nx2 with time in the first row/column) and raster scans stored as `.npz` with the
//! arrays `time`, `data` (`width x height x time`) and optionally the axes `x` and `y`.

use crate::data_container::{DeconvolutionResult, ScannedImage, Trace};
use crate::error::{DeconvolutionError, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::{Array, Array1, Array2, Array3, Axis, Dimension};
use ndarray_npy::{read_npy, NpzReader, NpzWriter, ReadableElement};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Loads a single trace, dispatching on the file extension.
pub fn load_trace(path: &Path) -> Result<Trace> {
    match extension(path).as_str() {
        "csv" | "tsv" | "txt" | "dat" => load_trace_csv(path),
        "npy" => load_trace_npy(path),
        "npz" => {
            let scan = load_scan_npz(path)?;
            if scan.width * scan.height != 1 {
                return Err(DeconvolutionError::invalid_trace(format!(
                    "{path:?} contains {}x{} traces, expected a single trace",
                    scan.width, scan.height
                )));
            }
            scan.trace(0, 0)
                .ok_or_else(|| DeconvolutionError::invalid_trace("empty scan"))
        }
        other => Err(DeconvolutionError::config(format!(
            "file not supported: {path:?} (extension \"{other}\")"
        ))),
    }
}

/// Loads a raster scan. Single trace files are loaded as a 1x1 scan.
pub fn load_scan(path: &Path) -> Result<ScannedImage> {
    match extension(path).as_str() {
        "npz" => load_scan_npz(path),
        _ => Ok(ScannedImage::from_trace(&load_trace(path)?)),
    }
}

fn detect_delimiter(content: &str) -> u8 {
    let first_line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or_default();
    if first_line.contains('\t') {
        b'\t'
    } else if first_line.contains(';') {
        b';'
    } else if first_line.contains(',') {
        b','
    } else {
        b' '
    }
}

/// Reads a two-column trace (time in ps, signal). A header row and `#` comments are skipped.
pub fn load_trace_csv(path: &Path) -> Result<Trace> {
    let content = std::fs::read_to_string(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(detect_delimiter(&content))
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut time = vec![];
    let mut signal = vec![];
    for (row_index, result) in rdr.records().enumerate() {
        let row = result?;
        let fields: Vec<&str> = row.iter().filter(|f| !f.is_empty()).collect();
        if fields.len() < 2 {
            return Err(DeconvolutionError::invalid_trace(format!(
                "row {} of {path:?} has less than two columns",
                row_index + 1
            )));
        }
        match (fields[0].parse::<f32>(), fields[1].parse::<f32>()) {
            (Ok(t), Ok(s)) => {
                time.push(t);
                signal.push(s);
            }
            // header
            _ if time.is_empty() && row_index == 0 => continue,
            _ => {
                return Err(DeconvolutionError::invalid_trace(format!(
                    "row {} of {path:?} is not numeric",
                    row_index + 1
                )))
            }
        }
    }
    Trace::new(Array1::from_vec(time), Array1::from_vec(signal))
}

/// Reads a trace from a 2xN or Nx2 numpy array of `f64` or `f32`.
pub fn load_trace_npy(path: &Path) -> Result<Trace> {
    let array: Array2<f32> = match read_npy::<_, Array2<f64>>(path) {
        Ok(a) => a.mapv(|v| v as f32),
        Err(_) => read_npy::<_, Array2<f32>>(path)?,
    };
    let array = match array.dim() {
        (2, _) => array,
        (_, 2) => array.reversed_axes(),
        (rows, cols) => {
            return Err(DeconvolutionError::invalid_trace(format!(
                "expected a 2xN or Nx2 array in {path:?}, got {rows}x{cols}"
            )))
        }
    };
    Trace::new(
        array.index_axis(Axis(0), 0).to_owned(),
        array.index_axis(Axis(0), 1).to_owned(),
    )
}

/// Reads an array from an npz archive, with or without the `.npy` suffix in the entry name.
pub(crate) fn npz_array<R, A, D>(npz: &mut NpzReader<R>, name: &str) -> Result<Array<A, D>>
where
    R: Read + Seek,
    A: ReadableElement,
    D: Dimension,
{
    match npz.by_name(name) {
        Ok(array) => Ok(array),
        Err(_) => Ok(npz.by_name(&format!("{name}.npy"))?),
    }
}

/// Reads an `f64` or `f32` array from an npz archive as `f32`.
pub(crate) fn npz_array_f32<R, D>(npz: &mut NpzReader<R>, name: &str) -> Result<Array<f32, D>>
where
    R: Read + Seek,
    D: Dimension,
{
    match npz_array::<R, f64, D>(npz, name) {
        Ok(array) => Ok(array.mapv(|v| v as f32)),
        Err(_) => npz_array::<R, f32, D>(npz, name),
    }
}

/// Reads a raster scan from an npz archive.
pub fn load_scan_npz(path: &Path) -> Result<ScannedImage> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let time: Array1<f32> = npz_array_f32(&mut npz, "time")?;
    let mut data: Array3<f32> = npz_array_f32(&mut npz, "data")?;
    let x: Option<Array1<f32>> = npz_array_f32(&mut npz, "x").ok();
    let y: Option<Array1<f32>> = npz_array_f32(&mut npz, "y").ok();

    let axes = match (x, y) {
        (Some(mut x), Some(mut y)) if x.len() >= 2 && y.len() >= 2 => {
            // pixels are stored with ascending coordinates
            if x[1] < x[0] {
                x.invert_axis(Axis(0));
                data.invert_axis(Axis(0));
            }
            if y[1] < y[0] {
                y.invert_axis(Axis(0));
                data.invert_axis(Axis(1));
            }
            Some((x[0], x[1] - x[0], y[0], y[1] - y[0]))
        }
        (Some(_), Some(_)) => {
            log::warn!("ignoring spatial axes in {path:?}, at least two positions are required");
            None
        }
        _ => None,
    };
    let mut scan = ScannedImage::new(time, data.as_standard_layout().into_owned())?;
    if let Some((x_min, dx, y_min, dy)) = axes {
        scan = scan.with_axes(x_min, dx, y_min, dy);
    }
    log::info!(
        "loaded scan {path:?} with {}x{} pixels and {} samples",
        scan.width,
        scan.height,
        scan.time.len()
    );
    Ok(scan)
}

/// Writes columns of equal length with a header row.
pub fn save_columns_csv(path: &Path, header: &[&str], columns: &[&Array1<f32>]) -> Result<()> {
    let n = columns.first().map(|c| c.len()).unwrap_or(0);
    if columns.iter().any(|c| c.len() != n) || header.len() != columns.len() {
        return Err(DeconvolutionError::config(
            "all columns must have the same length and a header",
        ));
    }
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(header)?;
    for i in 0..n {
        wtr.write_record(columns.iter().map(|c| c[i].to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the impulse response of one pixel as `time, impulse`.
pub fn save_impulse_csv(
    path: &Path,
    result: &DeconvolutionResult,
    x: usize,
    y: usize,
) -> Result<()> {
    let impulse = result
        .impulse_trace(x, y)
        .ok_or_else(|| DeconvolutionError::config(format!("pixel ({x}, {y}) is out of range")))?;
    save_columns_csv(
        path,
        &["Time_abs/ps", "Impulse response"],
        &[&result.time, &impulse],
    )
}

/// Writes the transfer function of one pixel as `frequency, amplitude, phase`.
pub fn save_transfer_csv(
    path: &Path,
    result: &DeconvolutionResult,
    x: usize,
    y: usize,
) -> Result<()> {
    let out_of_range =
        || DeconvolutionError::config(format!("pixel ({x}, {y}) is out of range"));
    let amplitude = result.transfer_amplitude(x, y).ok_or_else(out_of_range)?;
    let phase = result.transfer_phase(x, y).ok_or_else(out_of_range)?;
    save_columns_csv(
        path,
        &["Frequency/THz", "Amplitude", "Phase/rad"],
        &[&result.frequency, &amplitude, &phase],
    )
}

/// Writes the complete result to an npz archive.
pub fn save_result_npz(path: &Path, result: &DeconvolutionResult) -> Result<()> {
    let mut npz = NpzWriter::new(File::create(path)?);
    npz.add_array("time", &result.time)?;
    npz.add_array("frequency", &result.frequency)?;
    npz.add_array("impulse", &result.impulse)?;
    npz.add_array("transfer_amplitude", &result.transfer.mapv(|c| c.norm()))?;
    npz.add_array("transfer_phase", &result.transfer.mapv(|c| c.arg()))?;
    npz.add_array("img", &result.img)?;
    npz.finish()?;
    log::info!("saved result to {path:?}");
    Ok(())
}
