//! CSV and ASCII PLY encoding of point clouds.
//!
//! Files are staged next to their destination and only replace it on
//! commit, so a failed or abandoned write never leaves a truncated scan
//! behind. A commit replaces both files or neither.

use crate::error::{Result, ScanError};
use crate::numeric::fixed;
use log::{debug, warn};
use rplidar_data::{OutputPaths, Point, PointCloud};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const CSV_HEADER: [&str; 6] = ["quality", "angle_deg", "distance_mm", "x_m", "y_m", "z_m"];

/// Extra column of clouds holding tilted sweeps.
pub const CSV_TILT_COLUMN: &str = "tilt_deg";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileWriter {
    extended_ply: bool,
}

impl FileWriter {
    /// `extended_ply` adds quality, angle and distance to every PLY vertex.
    pub fn new(extended_ply: bool) -> FileWriter {
        FileWriter { extended_ply }
    }

    /// Planar clouds get the six column layout. Clouds holding a tilted sweep
    /// add a trailing `tilt_deg` column.
    ///
    /// Distances keep one decimal, so quarter millimetre readings are rounded.
    pub fn write_csv<W: Write>(&self, cloud: &PointCloud, writer: W) -> io::Result<()> {
        let planar = cloud.is_planar();
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = CSV_HEADER.to_vec();
        if !planar {
            header.push(CSV_TILT_COLUMN);
        }
        csv_writer.write_record(&header)?;

        for point in cloud {
            let mut record = vec![
                point.quality.to_string(),
                fixed(point.angle_deg, 2),
                fixed(point.distance_mm, 1),
                fixed(point.x, 3),
                fixed(point.y, 3),
            ];
            if planar {
                record.push("0.0".to_string());
            } else {
                record.push(fixed(point.z, 3));
                record.push(fixed(point.tilt_deg, 2));
            }
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()
    }

    pub fn write_ply<W: Write>(&self, cloud: &PointCloud, writer: W) -> io::Result<()> {
        let mut writer = BufWriter::new(writer);
        writeln!(writer, "ply")?;
        writeln!(writer, "format ascii 1.0")?;
        let tilts: Vec<String> = cloud.tilts().iter().map(|t| t.to_string()).collect();
        if !tilts.is_empty() {
            writeln!(writer, "comment rplidar scan, tilt {} deg", tilts.join(" "))?;
        }
        writeln!(writer, "element vertex {}", cloud.len())?;
        writeln!(writer, "property float x")?;
        writeln!(writer, "property float y")?;
        writeln!(writer, "property float z")?;
        if self.extended_ply {
            writeln!(writer, "property uchar quality")?;
            writeln!(writer, "property float angle")?;
            writeln!(writer, "property float distance")?;
            writeln!(writer, "property float tilt")?;
        }
        writeln!(writer, "end_header")?;

        for point in cloud {
            write!(
                writer,
                "{} {} {}",
                fixed(point.x, 6),
                fixed(point.y, 6),
                fixed(point.z, 6)
            )?;
            if self.extended_ply {
                write!(
                    writer,
                    " {} {} {} {}",
                    point.quality,
                    fixed(point.angle_deg, 6),
                    fixed(point.distance_mm, 6),
                    fixed(point.tilt_deg, 6)
                )?;
            }
            writeln!(writer)?;
        }
        writer.flush()
    }

    /// Encodes both files into temporaries beside their destinations.
    pub fn stage(&self, cloud: &PointCloud, outputs: &OutputPaths) -> Result<StagedOutput> {
        let mut csv_file = temp_file_for(&outputs.csv)?;
        self.write_csv(cloud, csv_file.as_file_mut())
            .map_err(|source| write_failure(&outputs.csv, source))?;

        let mut ply_file = temp_file_for(&outputs.ply)?;
        self.write_ply(cloud, ply_file.as_file_mut())
            .map_err(|source| write_failure(&outputs.ply, source))?;

        Ok(StagedOutput {
            files: vec![
                (csv_file, outputs.csv.clone()),
                (ply_file, outputs.ply.clone()),
            ],
        })
    }

    pub fn write(&self, cloud: &PointCloud, outputs: &OutputPaths) -> Result<()> {
        self.stage(cloud, outputs)?.commit()
    }
}

/// Encoded files waiting to replace their destinations. Dropping it
/// deletes the temporaries and leaves the destinations untouched.
#[derive(Debug)]
pub struct StagedOutput {
    files: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedOutput {
    /// Moves the staged files over their destinations. Existing files are set
    /// aside first and put back if any file fails, so the destinations end up
    /// all new or all as they were.
    pub fn commit(self) -> Result<()> {
        for (file, destination) in &self.files {
            file.as_file()
                .sync_all()
                .map_err(|source| write_failure(destination, source))?;
        }

        let mut replaced: Vec<Replaced> = Vec::with_capacity(self.files.len());
        for (file, destination) in self.files {
            let backup = match set_aside(&destination) {
                Ok(backup) => backup,
                Err(source) => {
                    roll_back(replaced);
                    return Err(write_failure(&destination, source));
                }
            };
            match file.persist(&destination) {
                Ok(_) => replaced.push(Replaced {
                    destination,
                    backup,
                    written: true,
                }),
                Err(e) => {
                    replaced.push(Replaced {
                        destination: destination.clone(),
                        backup,
                        written: false,
                    });
                    roll_back(replaced);
                    return Err(write_failure(&destination, e.error));
                }
            }
        }

        for file in replaced {
            if let Some(backup) = file.backup {
                if let Err(e) = fs::remove_file(&backup) {
                    warn!("Failed to remove {}: {}", backup.display(), e);
                }
            }
            debug!("Wrote {}", file.destination.display());
        }
        Ok(())
    }
}

/// A destination touched by a commit in progress.
struct Replaced {
    destination: PathBuf,
    /// Where the previous file was moved to, if there was one.
    backup: Option<PathBuf>,
    /// Whether the new file is already in place.
    written: bool,
}

/// Renames an existing file at `destination` out of the way. Directories are
/// left alone; persisting over them fails.
fn set_aside(destination: &Path) -> io::Result<Option<PathBuf>> {
    match fs::symlink_metadata(destination) {
        Ok(metadata) if metadata.is_dir() => Ok(None),
        Ok(_) => {
            let name = destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let backup =
                destination.with_file_name(format!(".{}.{}.bak", name, Uuid::new_v4().simple()));
            fs::rename(destination, &backup)?;
            Ok(Some(backup))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn roll_back(replaced: Vec<Replaced>) {
    for file in replaced.into_iter().rev() {
        if file.written {
            if let Err(e) = fs::remove_file(&file.destination) {
                warn!("Failed to remove {}: {}", file.destination.display(), e);
            }
        }
        if let Some(backup) = file.backup {
            if let Err(e) = fs::rename(&backup, &file.destination) {
                warn!(
                    "Failed to restore {} from {}: {}",
                    file.destination.display(),
                    backup.display(),
                    e
                );
            }
        }
    }
}

fn temp_file_for(destination: &Path) -> Result<NamedTempFile> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| write_failure(destination, source))?;
    NamedTempFile::new_in(dir).map_err(|source| write_failure(destination, source))
}

fn write_failure(path: &Path, source: io::Error) -> ScanError {
    ScanError::WriteFailure {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    quality: u8,
    angle_deg: f64,
    distance_mm: f64,
    x_m: f64,
    y_m: f64,
    z_m: f64,
    #[serde(default)]
    tilt_deg: f64,
}

/// Loads the points of a CSV scan.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Point>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row?;
        points.push(Point {
            x: row.x_m,
            y: row.y_m,
            z: row.z_m,
            quality: row.quality,
            angle_deg: row.angle_deg,
            distance_mm: row.distance_mm,
            tilt_deg: row.tilt_deg,
        });
    }
    Ok(points)
}

/// Loads the vertices of an ASCII PLY scan. Provenance fields missing from
/// the file are left at zero.
pub fn read_ply<P: AsRef<Path>>(path: P) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let parse_error = |message: String| ScanError::Parse {
        what: path.display().to_string(),
        message,
    };

    let mut lines = BufReader::new(fs::File::open(path)?).lines();
    let mut next_line = || -> Result<Option<String>> { Ok(lines.next().transpose()?) };

    if next_line()?.as_deref() != Some("ply") {
        return Err(parse_error("missing ply magic".to_string()));
    }

    let mut vertex_count: Option<usize> = None;
    let mut properties: Vec<String> = Vec::new();
    loop {
        let line = next_line()?.ok_or_else(|| parse_error("header never ends".to_string()))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["format", format, ..] if *format != "ascii" => {
                return Err(parse_error(format!("unsupported format {}", format)));
            }
            ["element", "vertex", count] => {
                let count = count
                    .parse()
                    .map_err(|_| parse_error(format!("bad vertex count {}", count)))?;
                vertex_count = Some(count);
            }
            ["property", _, name] if vertex_count.is_some() => properties.push(name.to_string()),
            ["end_header"] => break,
            _ => (),
        }
    }
    let vertex_count = vertex_count.ok_or_else(|| parse_error("no vertex element".to_string()))?;

    let column = |name: &str| properties.iter().position(|p| p == name);
    let (x, y, z) = match (column("x"), column("y"), column("z")) {
        (Some(x), Some(y), Some(z)) => (x, y, z),
        _ => return Err(parse_error("vertex lacks x, y or z".to_string())),
    };
    let (quality, angle, distance, tilt) = (
        column("quality"),
        column("angle"),
        column("distance"),
        column("tilt"),
    );

    let mut points = Vec::with_capacity(vertex_count);
    for row in 0..vertex_count {
        let line = next_line()?
            .ok_or_else(|| parse_error(format!("expected {} vertices, found {}", vertex_count, row)))?;
        let values = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| parse_error(format!("vertex {}: {}", row, e)))?;
        if values.len() != properties.len() {
            return Err(parse_error(format!(
                "vertex {} has {} values, header declares {}",
                row,
                values.len(),
                properties.len()
            )));
        }
        let optional = |index: Option<usize>| index.map_or(0., |i| values[i]);
        points.push(Point {
            x: values[x],
            y: values[y],
            z: values[z],
            quality: optional(quality) as u8,
            angle_deg: optional(angle),
            distance_mm: optional(distance),
            tilt_deg: optional(tilt),
        });
    }
    Ok(points)
}
