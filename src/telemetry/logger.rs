use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::telemetry::store::{ArraySpec, ArrayStore, ElementType};
use std::path::Path;
use tracing::{debug, info, warn};

/// Array whose row count defines the episode boundary values
pub const REFERENCE_FIELD: &str = "action";

/// Boundary-marker array under the meta group
const EPISODE_ENDS: &str = "meta/episode_ends";

/// Six-vector data arrays recorded every tick
const VECTOR_FIELDS: [&str; 6] = [
    "action",
    "robot_eef_pose",
    "robot_eef_pose_vel",
    "robot_joint",
    "robot_joint_vel",
    "robot_vel_cmd",
];

/// One telemetry timestep: named fields with fixed-shape numeric rows
#[derive(Debug, Clone, Default)]
pub struct TelemetryRecord {
    fields: Vec<(String, Vec<f64>)>,
}

impl TelemetryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a six-vector field
    pub fn vector<S: Into<String>>(mut self, name: S, values: [f64; 6]) -> Self {
        self.fields.push((name.into(), values.to_vec()));
        self
    }

    /// Add a scalar field
    pub fn scalar<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.fields.push((name.into(), vec![value]));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.fields
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

/// Telemetry logger appending timestep records to the array store.
///
/// Appends are strictly ordered by the single caller (the control loop);
/// every schema field receives exactly one row per append, so arrays never
/// drift out of alignment.
pub struct TelemetryLogger {
    store: ArrayStore,
}

impl TelemetryLogger {
    /// Open the backing store, creating or extending it according to the
    /// configuration. Layout mismatches with an existing store abort here.
    pub fn open(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let path = Path::new(&config.store_path);

        if config.overwrite && path.exists() {
            info!("Overwriting existing telemetry store at {}", path.display());
            std::fs::remove_dir_all(path).map_err(|e| TelemetryError::StoreOpen {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
        }

        let mut store = ArrayStore::open(path)?;

        for name in VECTOR_FIELDS {
            store.require_array(
                &format!("data/{}", name),
                ArraySpec::vector(ElementType::F32, 6, config.chunk_rows),
            )?;
        }
        store.require_array(
            "data/stage",
            ArraySpec::scalar(ElementType::I8, config.chunk_rows),
        )?;
        store.require_array(
            "data/timestamp",
            ArraySpec::scalar(ElementType::I64, config.chunk_rows),
        )?;
        store.require_array(
            EPISODE_ENDS,
            ArraySpec::scalar(ElementType::I64, config.chunk_rows),
        )?;

        info!(
            "Telemetry logger ready at {} ({} rows so far)",
            path.display(),
            store.rows(&format!("data/{}", REFERENCE_FIELD))?
        );

        Ok(Self { store })
    }

    /// Append one record. Fields without a schema array are skipped with a
    /// warning; rows for known fields are appended in record order.
    pub fn append(&mut self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        for (name, values) in record.fields() {
            let array = format!("data/{}", name);
            if !self.store.contains(&array) {
                warn!("Telemetry field '{}' not in schema, skipping", name);
                continue;
            }
            self.store.append(&array, values)?;
        }
        Ok(())
    }

    /// Mark the end of an episode by recording the reference array's
    /// current row count. Repeating boundaries (empty episodes) are fine.
    pub fn end_episode(&mut self) -> Result<(), TelemetryError> {
        let rows = self
            .store
            .rows(&format!("data/{}", REFERENCE_FIELD))?;
        self.store.append(EPISODE_ENDS, &[rows as f64])?;
        debug!("Episode boundary recorded at row {}", rows);
        Ok(())
    }

    /// Total rows appended to the reference array
    pub fn record_count(&self) -> Result<u64, TelemetryError> {
        self.store.rows(&format!("data/{}", REFERENCE_FIELD))
    }

    /// All episode boundary values recorded so far
    pub fn episode_ends(&self) -> Result<Vec<i64>, TelemetryError> {
        let count = self.store.rows(EPISODE_ENDS)?;
        let rows = self.store.read_rows(EPISODE_ENDS, 0, count)?;
        Ok(rows.into_iter().map(|row| row[0] as i64).collect())
    }

    /// Row count of a named data field, if it exists
    pub fn field_rows(&self, name: &str) -> Result<u64, TelemetryError> {
        self.store.rows(&format!("data/{}", name))
    }

    pub fn store(&self) -> &ArrayStore {
        &self.store
    }
}
