// ============================================================
// Layer 4 — Feature Loader
// ============================================================
// Reads one scale of one bag from its per-patient directory:
//
//   <feature_root>/<patient_id>/
//       C4_patch_features.pt    ← [N x D] float matrix, scale C4
//       C5_patch_features.pt    ← [N x D] float matrix, scale C5
//       patch_features.pt       ← single-scale mode (no tag)
//       info_patches.h5         ← HDF5 dataset "coords": [N x K]
//
// Decoders are picked by file extension:
//   .pt / .pth   → torch.save zip archive: data.pkl is parsed with
//                  candle-core's pickle reader, the tensor storage
//                  is read from the archive next to it
//   .npy         → NumPy array (ndarray-npy)
//   .h5 / .hdf5  → HDF5 dataset (hdf5 crate, `hdf5` feature)
//
// Both files are checked for existence BEFORE anything is
// decoded, so a bag with a missing coordinate file fails
// without handing back half of its data.
//
// Reference: candle-core pickle module
//            ndarray-npy crate documentation
//            Rust Book §9 (Error Handling)

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Component, Path, PathBuf},
};

use candle_core::{
    pickle::{Object, Stack, TensorInfo},
    DType, Device, Tensor,
};
use ndarray::{ArrayD, Axis, Ix1, Ix2};
use ndarray_npy::read_npy;
use zip::ZipArchive;

use crate::domain::{
    bag::{CoordTable, FeatureMatrix, ScaleFeatureSet, ScaleTag},
    error::{BagError, Result},
    traits::FeatureSource,
};

/// Entry name looked up in a .pt archive holding more than one tensor.
pub const TORCH_FEATURE_KEY: &str = "features";

/// Feature file extensions with a decoder.
pub const FEATURE_EXTENSIONS: &[&str] = &["pt", "pth", "npy"];

// ─── FileLayout ───────────────────────────────────────────────────────────────
/// File naming inside a patient directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    /// Extension of the feature files, without the dot ("pt", "npy")
    pub feature_extension: String,
    /// Name of the coordinate file ("info_patches.h5")
    pub coords_file: String,
    /// Dataset inside an HDF5 coordinate file ("coords")
    pub coords_dataset: String,
}

impl FileLayout {
    /// Check that this build can decode the configured file types,
    /// so a run fails at startup instead of on the first bag.
    pub fn ensure_readable(&self) -> Result<()> {
        let feature_ext = self.feature_extension.trim_start_matches('.').to_ascii_lowercase();
        if !FEATURE_EXTENSIONS.contains(&feature_ext.as_str()) {
            return Err(BagError::configuration(format!(
                "no feature decoder for extension '{}' (supported: {})",
                self.feature_extension,
                FEATURE_EXTENSIONS.join(", ")
            )));
        }

        match extension(Path::new(&self.coords_file)).as_str() {
            "npy" => Ok(()),
            "h5" | "hdf5" if cfg!(feature = "hdf5") => Ok(()),
            "h5" | "hdf5" => Err(BagError::configuration(format!(
                "coordinate file '{}' is HDF5 but this build has no HDF5 support; \
                 rebuild with `--features hdf5` or use a .npy coordinate file",
                self.coords_file
            ))),
            other => Err(BagError::configuration(format!(
                "no coordinate decoder for extension '{other}' (coordinate file '{}')",
                self.coords_file
            ))),
        }
    }
}

impl Default for FileLayout {
    fn default() -> Self {
        Self {
            feature_extension: "pt".to_string(),
            coords_file:       "info_patches.h5".to_string(),
            coords_dataset:    "coords".to_string(),
        }
    }
}

// ─── FeatureLoader ────────────────────────────────────────────────────────────
/// Loads scale feature sets from a directory of per-patient folders.
/// Implements the FeatureSource trait from Layer 3.
#[derive(Debug, Clone)]
pub struct FeatureLoader {
    root:   PathBuf,
    layout: FileLayout,
}

impl FeatureLoader {
    pub fn new(root: impl Into<PathBuf>, layout: FileLayout) -> Self {
        Self { root: root.into(), layout }
    }

    /// Directory of one patient. Rejects ids that would escape the root.
    pub fn bag_dir(&self, patient_id: &str) -> Result<PathBuf> {
        let rel = Path::new(patient_id);
        let plain = !patient_id.is_empty()
            && rel.components().count() == 1
            && matches!(rel.components().next(), Some(Component::Normal(_)));
        if !plain {
            return Err(BagError::invalid_value(format!(
                "patient id '{patient_id}' is not a plain directory name"
            )));
        }
        Ok(self.root.join(rel))
    }

    pub fn feature_path(&self, bag_dir: &Path, tag: &ScaleTag) -> PathBuf {
        bag_dir.join(format!("{}.{}", tag.feature_stem(), self.layout.feature_extension))
    }

    pub fn coords_path(&self, bag_dir: &Path) -> PathBuf {
        bag_dir.join(&self.layout.coords_file)
    }

    /// Load (features, coordinates) of one scale from `bag_dir`.
    ///
    /// # Errors
    /// * NotFound: feature or coordinate file missing
    /// * ShapeMismatch: coordinate rows != feature rows
    /// * ShapeMismatch: feature array that is not rank 2
    /// * InvalidValue: coordinate table of rank other than 1 or 2
    /// * Decode / UnsupportedFormat: unreadable content
    pub fn load(&self, bag_dir: &Path, tag: &ScaleTag) -> Result<ScaleFeatureSet> {
        let feature_path = self.feature_path(bag_dir, tag);
        let coords_path  = self.coords_path(bag_dir);

        require_file(&feature_path, "feature file")?;
        require_file(&coords_path, "coordinate file")?;

        let features = read_feature_matrix(&feature_path)?;
        let coords   = read_coord_table(&coords_path, &self.layout.coords_dataset)?;

        tracing::debug!(
            "Loaded scale {} from '{}': features {:?}, coords {:?}",
            tag,
            bag_dir.display(),
            features.dim(),
            coords.dim(),
        );

        ScaleFeatureSet::new(tag.clone(), features, coords)
    }
}

impl FeatureSource for FeatureLoader {
    fn load_scale(&self, patient_id: &str, tag: &ScaleTag) -> Result<ScaleFeatureSet> {
        let dir = self.bag_dir(patient_id)?;
        self.load(&dir, tag)
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BagError::not_found(what, path))
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ─── Feature Matrices ─────────────────────────────────────────────────────────

/// Decode an [N, D] feature matrix, picking the decoder by extension.
pub fn read_feature_matrix(path: &Path) -> Result<FeatureMatrix> {
    let array = match extension(path).as_str() {
        "pt" | "pth" => read_torch_f32(path)?,
        "npy"        => read_npy_f32(path)?,
        other => {
            return Err(BagError::unsupported(
                path,
                format!("no feature decoder for extension '{other}'"),
            ))
        }
    };

    if array.ndim() != 2 {
        return Err(BagError::shape_mismatch(
            format!("feature array in '{}' must be [N, D]", path.display()),
            vec![2],
            vec![array.ndim()],
        ));
    }
    array
        .into_dimensionality::<Ix2>()
        .map_err(|e| BagError::decode(path, e))
}

/// Read a tensor saved with torch.save.
///
/// The archive may hold the tensor itself (`torch.save(x)`) or a dict of
/// tensors: a dict with one tensor is taken as is, otherwise its
/// `features` entry is used.
fn read_torch_f32(path: &Path) -> Result<ArrayD<f32>> {
    let file = File::open(path).map_err(|e| BagError::io(path, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| BagError::decode(path, e))?;

    let pkl_name = zip
        .file_names()
        .find(|name| name.ends_with("data.pkl"))
        .map(str::to_string)
        .ok_or_else(|| BagError::decode(path, "no data.pkl in torch archive"))?;
    // storages live beside the pickle: <archive>/data/<key>
    let dir_name = PathBuf::from(pkl_name.trim_end_matches(".pkl"));

    let mut stack = Stack::empty();
    {
        let entry = zip.by_name(&pkl_name).map_err(|e| BagError::decode(path, e))?;
        stack
            .read_loop(&mut BufReader::new(entry))
            .map_err(|e| BagError::decode(path, e))?;
    }
    let object = stack.finalize().map_err(|e| BagError::decode(path, e))?;

    let info = pick_tensor(object, &dir_name)
        .map_err(|e| BagError::decode(path, e))?
        .ok_or_else(|| {
            BagError::decode(
                path,
                format!("expected a tensor, a single-tensor dict or a '{TORCH_FEATURE_KEY}' entry"),
            )
        })?;
    read_torch_storage(&mut zip, &info).map_err(|reason| BagError::decode(path, reason))
}

fn pick_tensor(object: Object, dir_name: &Path) -> candle_core::Result<Option<TensorInfo>> {
    match object {
        Object::Dict(entries) => {
            let mut infos = Vec::new();
            for (key, value) in entries {
                if let Some(info) = value.into_tensor_info(key, dir_name)? {
                    infos.push(info);
                }
            }
            if infos.len() == 1 {
                Ok(infos.pop())
            } else {
                Ok(infos.into_iter().find(|info| info.name == TORCH_FEATURE_KEY))
            }
        }
        bare => bare.into_tensor_info(Object::Unicode(TORCH_FEATURE_KEY.to_string()), dir_name),
    }
}

/// Decode the storage entry a TensorInfo points at, honouring its offset.
fn read_torch_storage<R: Read + Seek>(
    zip:  &mut ZipArchive<R>,
    info: &TensorInfo,
) -> std::result::Result<ArrayD<f32>, String> {
    let layout = &info.layout;
    if !layout.is_contiguous() {
        return Err(format!("tensor '{}' is not stored contiguously", info.name));
    }

    let elem_size = info.dtype.size_in_bytes();
    let start = layout.start_offset() * elem_size;
    let len   = layout.shape().elem_count() * elem_size;

    let mut bytes = Vec::new();
    zip.by_name(&info.path)
        .map_err(|e| format!("storage '{}': {e}", info.path))?
        .read_to_end(&mut bytes)
        .map_err(|e| format!("storage '{}': {e}", info.path))?;
    let raw = bytes.get(start..start + len).ok_or_else(|| {
        format!("storage '{}' holds {} bytes, tensor needs {}", info.path, bytes.len(), start + len)
    })?;

    let dims = layout.shape().dims().to_vec();
    let flat = Tensor::from_raw_buffer(raw, info.dtype, &dims, &Device::Cpu)
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.flatten_all())
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| e.to_string())?;

    ArrayD::from_shape_vec(dims, flat).map_err(|e| e.to_string())
}

fn read_npy_f32(path: &Path) -> Result<ArrayD<f32>> {
    if let Ok(a) = read_npy::<_, ArrayD<f32>>(path) {
        return Ok(a);
    }
    read_npy::<_, ArrayD<f64>>(path)
        .map(|a| a.mapv(|v| v as f32))
        .map_err(|e| BagError::decode(path, e))
}

// ─── Coordinate Tables ────────────────────────────────────────────────────────

/// Decode an [N, K] coordinate table. Rank-1 tables are read as [N, 1].
pub fn read_coord_table(path: &Path, dataset: &str) -> Result<CoordTable> {
    let array = match extension(path).as_str() {
        "h5" | "hdf5" => read_hdf5_f64(path, dataset)?,
        "npy"         => read_npy_f64(path)?,
        other => {
            return Err(BagError::unsupported(
                path,
                format!("no coordinate decoder for extension '{other}'"),
            ))
        }
    };

    match array.ndim() {
        2 => array.into_dimensionality::<Ix2>().map_err(|e| BagError::decode(path, e)),
        1 => array
            .into_dimensionality::<Ix1>()
            .map(|a| a.insert_axis(Axis(1)))
            .map_err(|e| BagError::decode(path, e)),
        rank => Err(BagError::invalid_value(format!(
            "coordinate table in '{}' must have rank 1 or 2, got rank {rank}",
            path.display()
        ))),
    }
}

/// Coordinates may be stored as float or integer; all are widened to f64.
fn read_npy_f64(path: &Path) -> Result<ArrayD<f64>> {
    if let Ok(a) = read_npy::<_, ArrayD<f64>>(path) {
        return Ok(a);
    }
    if let Ok(a) = read_npy::<_, ArrayD<f32>>(path) {
        return Ok(a.mapv(f64::from));
    }
    if let Ok(a) = read_npy::<_, ArrayD<i64>>(path) {
        return Ok(a.mapv(|v| v as f64));
    }
    read_npy::<_, ArrayD<i32>>(path)
        .map(|a| a.mapv(f64::from))
        .map_err(|e| BagError::decode(path, e))
}

#[cfg(feature = "hdf5")]
fn read_hdf5_f64(path: &Path, dataset: &str) -> Result<ArrayD<f64>> {
    let file = hdf5::File::open(path).map_err(|e| BagError::decode(path, e))?;
    let ds = file
        .dataset(dataset)
        .map_err(|e| BagError::decode(path, format!("dataset '{dataset}': {e}")))?;
    ds.read_dyn::<f64>().map_err(|e| BagError::decode(path, e))
}

#[cfg(not(feature = "hdf5"))]
fn read_hdf5_f64(path: &Path, _dataset: &str) -> Result<ArrayD<f64>> {
    Err(BagError::unsupported(
        path,
        "built without HDF5 support (enable the `hdf5` feature)",
    ))
}
