use crate::error::TelemetryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const META_FILE: &str = "array.json";

/// Element type of a persistent array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    I8,
    I64,
}

impl ElementType {
    pub fn size(&self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::I8 => 1,
            ElementType::I64 => 8,
        }
    }

    fn encode(&self, value: f64, out: &mut Vec<u8>) {
        match self {
            ElementType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            ElementType::I8 => out.extend_from_slice(&(value as i8).to_le_bytes()),
            ElementType::I64 => out.extend_from_slice(&(value as i64).to_le_bytes()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            ElementType::F32 => f32::from_le_bytes(bytes[..4].try_into().unwrap()) as f64,
            ElementType::I8 => i8::from_le_bytes(bytes[..1].try_into().unwrap()) as f64,
            ElementType::I64 => i64::from_le_bytes(bytes[..8].try_into().unwrap()) as f64,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::F32 => write!(f, "f32"),
            ElementType::I8 => write!(f, "i8"),
            ElementType::I64 => write!(f, "i64"),
        }
    }
}

/// Layout of one append-only array: element type, row width (1 = scalar)
/// and rows per storage chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    pub dtype: ElementType,
    pub row_len: usize,
    pub chunk_rows: usize,
}

impl ArraySpec {
    pub fn vector(dtype: ElementType, row_len: usize, chunk_rows: usize) -> Self {
        Self {
            dtype,
            row_len,
            chunk_rows,
        }
    }

    pub fn scalar(dtype: ElementType, chunk_rows: usize) -> Self {
        Self {
            dtype,
            row_len: 1,
            chunk_rows,
        }
    }

    pub fn row_size(&self) -> usize {
        self.row_len * self.dtype.size()
    }

    fn layout(&self) -> String {
        format!(
            "{} x{} chunk_rows={}",
            self.dtype, self.row_len, self.chunk_rows
        )
    }
}

/// On-disk metadata document stored beside each array's chunk files
#[derive(Debug, Serialize, Deserialize)]
struct ArrayMeta {
    #[serde(flatten)]
    spec: ArraySpec,
    rows: u64,
}

struct ArrayState {
    spec: ArraySpec,
    dir: PathBuf,
    rows: u64,
}

impl ArrayState {
    fn chunk_path(&self, chunk_index: u64) -> PathBuf {
        self.dir.join(format!("c{:08}.bin", chunk_index))
    }

    fn write_meta(&self, name: &str) -> Result<(), TelemetryError> {
        let meta = ArrayMeta {
            spec: self.spec,
            rows: self.rows,
        };
        let bytes = serde_json::to_vec_pretty(&meta).map_err(|e| TelemetryError::Corrupt {
            array: name.to_string(),
            details: e.to_string(),
        })?;
        fs::write(self.dir.join(META_FILE), bytes).map_err(|e| TelemetryError::Io {
            array: name.to_string(),
            source: e,
        })
    }
}

/// Append-only chunked array store persisted as a directory of files.
///
/// Each array lives in its own directory holding an `array.json` metadata
/// document plus fixed-size little-endian chunk files. Opening is always
/// append-or-create: arrays already on disk are picked up and extended,
/// and a layout mismatch against a requested spec is a fatal error.
pub struct ArrayStore {
    root: PathBuf,
    arrays: BTreeMap<String, ArrayState>,
}

impl ArrayStore {
    /// Open a store at `root`, creating it if absent and loading the
    /// metadata of every array already present.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, TelemetryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| TelemetryError::StoreOpen {
            path: root.clone(),
            details: e.to_string(),
        })?;

        let mut store = Self {
            root: root.clone(),
            arrays: BTreeMap::new(),
        };
        store.discover(&root, "")?;

        debug!(
            "Opened array store at {} ({} arrays)",
            root.display(),
            store.arrays.len()
        );

        Ok(store)
    }

    fn discover(&mut self, dir: &Path, prefix: &str) -> Result<(), TelemetryError> {
        let entries = fs::read_dir(dir).map_err(|e| TelemetryError::StoreOpen {
            path: dir.to_path_buf(),
            details: e.to_string(),
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(segment) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{}/{}", prefix, segment)
            };

            if path.join(META_FILE).exists() {
                let state = Self::load_array(&name, &path)?;
                self.arrays.insert(name, state);
            } else {
                self.discover(&path, &name)?;
            }
        }

        Ok(())
    }

    fn load_array(name: &str, dir: &Path) -> Result<ArrayState, TelemetryError> {
        let bytes = fs::read(dir.join(META_FILE)).map_err(|e| TelemetryError::Io {
            array: name.to_string(),
            source: e,
        })?;
        let meta: ArrayMeta =
            serde_json::from_slice(&bytes).map_err(|e| TelemetryError::Corrupt {
                array: name.to_string(),
                details: format!("unreadable metadata: {}", e),
            })?;

        let state = ArrayState {
            spec: meta.spec,
            dir: dir.to_path_buf(),
            rows: meta.rows,
        };

        // The chunk files must hold exactly the recorded number of rows
        let mut total_bytes = 0u64;
        for entry in fs::read_dir(dir)
            .map_err(|e| TelemetryError::Io {
                array: name.to_string(),
                source: e,
            })?
            .flatten()
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "bin") {
                total_bytes += path.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        let expected = meta.rows * state.spec.row_size() as u64;
        if total_bytes != expected {
            return Err(TelemetryError::Corrupt {
                array: name.to_string(),
                details: format!(
                    "chunk files hold {} bytes, metadata expects {}",
                    total_bytes, expected
                ),
            });
        }

        Ok(state)
    }

    /// Ensure an array with the given layout exists, creating it when
    /// absent. An existing array with a different layout is a fatal
    /// mismatch.
    pub fn require_array(&mut self, name: &str, spec: ArraySpec) -> Result<(), TelemetryError> {
        if let Some(existing) = self.arrays.get(name) {
            if existing.spec != spec {
                return Err(TelemetryError::SchemaMismatch {
                    array: name.to_string(),
                    expected: spec.layout(),
                    found: existing.spec.layout(),
                });
            }
            return Ok(());
        }

        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|e| TelemetryError::Io {
            array: name.to_string(),
            source: e,
        })?;

        let state = ArrayState { spec, dir, rows: 0 };
        state.write_meta(name)?;
        info!("Created array {} ({})", name, spec.layout());
        self.arrays.insert(name.to_string(), state);

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn spec(&self, name: &str) -> Option<ArraySpec> {
        self.arrays.get(name).map(|s| s.spec)
    }

    /// Logical row count of an array
    pub fn rows(&self, name: &str) -> Result<u64, TelemetryError> {
        self.arrays
            .get(name)
            .map(|s| s.rows)
            .ok_or_else(|| TelemetryError::UnknownArray {
                array: name.to_string(),
            })
    }

    /// Append one row. The value slice length must match the array's row
    /// width; values are converted to the array's element type.
    pub fn append(&mut self, name: &str, values: &[f64]) -> Result<(), TelemetryError> {
        let state = self
            .arrays
            .get_mut(name)
            .ok_or_else(|| TelemetryError::UnknownArray {
                array: name.to_string(),
            })?;

        if values.len() != state.spec.row_len {
            return Err(TelemetryError::RowShape {
                array: name.to_string(),
                got: values.len(),
                expected: state.spec.row_len,
            });
        }

        let mut row = Vec::with_capacity(state.spec.row_size());
        for value in values {
            state.spec.dtype.encode(*value, &mut row);
        }

        let chunk_index = state.rows / state.spec.chunk_rows as u64;
        let chunk_path = state.chunk_path(chunk_index);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&chunk_path)
            .map_err(|e| TelemetryError::Io {
                array: name.to_string(),
                source: e,
            })?;
        file.write_all(&row).map_err(|e| TelemetryError::Io {
            array: name.to_string(),
            source: e,
        })?;

        state.rows += 1;
        state.write_meta(name)?;

        Ok(())
    }

    /// Read up to `count` rows starting at `start`, decoded to f64
    pub fn read_rows(
        &self,
        name: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Vec<f64>>, TelemetryError> {
        let state = self
            .arrays
            .get(name)
            .ok_or_else(|| TelemetryError::UnknownArray {
                array: name.to_string(),
            })?;

        let end = (start + count).min(state.rows);
        let row_size = state.spec.row_size();
        let elem_size = state.spec.dtype.size();
        let mut rows = Vec::new();
        let mut buf = vec![0u8; row_size];

        for index in start..end {
            let chunk_index = index / state.spec.chunk_rows as u64;
            let offset = (index % state.spec.chunk_rows as u64) * row_size as u64;

            let mut file =
                fs::File::open(state.chunk_path(chunk_index)).map_err(|e| TelemetryError::Io {
                    array: name.to_string(),
                    source: e,
                })?;
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(&mut buf))
                .map_err(|e| TelemetryError::Io {
                    array: name.to_string(),
                    source: e,
                })?;

            let row = buf
                .chunks(elem_size)
                .map(|chunk| state.spec.dtype.decode(chunk))
                .collect();
            rows.push(row);
        }

        Ok(rows)
    }
}
