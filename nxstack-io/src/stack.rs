//! Stacks of lower-rank datasets written as 2-D or 3-D NeXus datasets.
//!
//! Items are collected per key in arrival order and written on
//! [`StackAggregator::finish`]. Without a [`ScanGrid`] each key becomes a
//! stack of shape `(count, item...)`; with a grid that covers every item it
//! becomes `(slow, fast, item...)`, built one band of `fast` items at a time.

use crate::hdf5::{self as h5, NX_ENTRY, NX_SDS};
use crate::worker::CancelToken;
use crate::{Error, Result};
use hdf5::{Dataset as H5Dataset, Group};
use log::{debug, warn};
use nxstack_core::{Data, Dataset, LazyDataset};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Group that receives datasets whose key has no group component.
pub const DEFAULT_ENTRY: &str = "entry1";

const ORIGINAL_NAME_ATTR: &str = "original_name";
const SIGNAL_ATTR: &str = "signal";
const AXIS_ATTR: &str = "axis";

/// Layout of a two-dimensional scan: `fast` points per row, `slow` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanGrid {
    pub fast: usize,
    pub slow: usize,
}

impl ScanGrid {
    #[must_use]
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }

    /// Whether the grid holds exactly `count` points.
    #[must_use]
    pub fn fits(&self, count: usize) -> bool {
        self.fast > 0 && self.fast.checked_mul(self.slow) == Some(count)
    }
}

/// One dataset written by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackedDataset {
    pub key: String,
    pub shape: Vec<usize>,
    pub signal: bool,
}

/// Collects lazy datasets per key and writes them as stacks.
#[derive(Debug, Default)]
pub struct StackAggregator {
    order: Vec<String>,
    items: HashMap<String, Vec<LazyDataset>>,
    axis: Option<(String, LazyDataset)>,
    grid: Option<ScanGrid>,
}

impl StackAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_grid(mut self, grid: Option<ScanGrid>) -> Self {
        self.grid = grid;
        self
    }

    /// Appends `item` to the stack for `key`.
    pub fn add(&mut self, key: impl Into<String>, item: LazyDataset) {
        let key = key.into();
        match self.items.get_mut(&key) {
            Some(items) => items.push(item),
            None => {
                self.order.push(key.clone());
                self.items.insert(key, vec![item]);
            }
        }
    }

    /// Sets the axis written next to the stacks. Only the first call counts.
    pub fn set_axis(&mut self, key: impl Into<String>, axis: LazyDataset) {
        if self.axis.is_none() {
            self.axis = Some((key.into(), axis));
        }
    }

    /// Keys in arrival order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    /// Number of items collected for `key`.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.items.get(key).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Writes every stack and the axis to `output`.
    ///
    /// The file is built at `<output>.part` and renamed over `output` only
    /// when everything was written; otherwise the partial file is removed.
    ///
    /// # Errors
    /// Returns `Cancelled` if `cancel` fires, or the first read or write
    /// error. Items of one key must agree in shape and element type.
    pub fn finish(self, output: &Path, cancel: &CancelToken) -> Result<Vec<StackedDataset>> {
        let part = PartFile::create(output)?;
        let written = {
            let file = hdf5::File::create(part.path())?;
            let result = self.write_all(&file, cancel);
            if let Err(e) = file.close() {
                warn!("cannot close {}: {e}", part.path().display());
            }
            result?
        };
        part.commit()?;
        Ok(written)
    }

    fn write_all(&self, file: &hdf5::File, cancel: &CancelToken) -> Result<Vec<StackedDataset>> {
        let axis_len = self
            .axis
            .as_ref()
            .and_then(|(_, axis)| axis.shape().first().copied());

        let mut written = Vec::with_capacity(self.order.len());
        for key in &self.order {
            cancel.check()?;
            let Some(items) = self.items.get(key) else { continue };
            let Some(first) = items.first() else { continue };

            let (group, name) = parent_group(file, key, NX_ENTRY)?;
            let dataset = match self.grid.filter(|g| g.fits(items.len())) {
                Some(grid) => write_banded(&group, name, items, grid.fast, cancel)?,
                None => write_sequential(&group, name, items, cancel)?,
            };

            let signal = axis_len.is_some() && first.shape().first().copied() == axis_len;
            if signal {
                h5::set_attr_str(&dataset, SIGNAL_ATTR, "1")?;
            }
            h5::set_nx_class(&dataset, NX_SDS)?;
            h5::set_attr_str(&dataset, ORIGINAL_NAME_ATTR, key)?;
            debug!("stacked {} items of {key} into {:?}", items.len(), dataset.shape());
            written.push(StackedDataset {
                key: key.clone(),
                shape: dataset.shape(),
                signal,
            });
        }

        if let Some((key, axis)) = &self.axis {
            cancel.check()?;
            let (group, name) = parent_group(file, key, NX_ENTRY)?;
            let data = axis.get_complete_data()?;
            let dataset = h5::replace_dataset(&group, name, data.data())?;
            h5::set_nx_class(&dataset, NX_SDS)?;
            h5::set_attr_str(&dataset, AXIS_ATTR, "1")?;
        }
        Ok(written)
    }
}

fn write_sequential(
    group: &Group,
    name: &str,
    items: &[LazyDataset],
    cancel: &CancelToken,
) -> Result<H5Dataset> {
    let first = &items[0];
    let dataset = h5::create_stack_dataset(group, name, first.element_type(), &first.shape())?;
    for item in items {
        cancel.check()?;
        let data = load_like(item, first)?;
        h5::append_item(&dataset, data.data())?;
    }
    Ok(dataset)
}

fn write_banded(
    group: &Group,
    name: &str,
    items: &[LazyDataset],
    fast: usize,
    cancel: &CancelToken,
) -> Result<H5Dataset> {
    let first = &items[0];
    let mut band_shape = vec![fast];
    band_shape.extend(first.shape());
    let dataset = h5::create_stack_dataset(group, name, first.element_type(), &band_shape)?;
    for band in items.chunks(fast) {
        cancel.check()?;
        let parts = band
            .iter()
            .map(|item| load_like(item, first).map(Dataset::into_data))
            .collect::<Result<Vec<Data>>>()?;
        h5::append_item(&dataset, &Data::stack(&parts)?)?;
    }
    Ok(dataset)
}

fn load_like(item: &LazyDataset, first: &LazyDataset) -> Result<Dataset> {
    if item.element_type() != first.element_type() {
        return Err(nxstack_core::Error::TypeMismatch {
            expected: first.element_type().name(),
            actual: item.element_type().name(),
        }
        .into());
    }
    Ok(item.get_complete_data()?)
}

/// Opens the group a slash-separated dataset key lives in, creating it as
/// needed, and returns it with the dataset name. Intermediate groups are
/// `NXentry`; the parent gets `parent_class`.
pub(crate) fn parent_group<'k>(
    file: &hdf5::File,
    key: &'k str,
    parent_class: &str,
) -> Result<(Group, &'k str)> {
    let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [] => Err(Error::InvalidArgument(format!("empty dataset key '{key}'"))),
        [name] => Ok((h5::ensure_group(file, DEFAULT_ENTRY, NX_ENTRY)?, name)),
        [groups @ .., name] => {
            let path = groups.join("/");
            let class = if groups.len() > 1 { parent_class } else { NX_ENTRY };
            Ok((h5::ensure_group_path(file, &path, NX_ENTRY, class)?, name))
        }
    }
}

/// Output file under construction, removed on drop unless committed.
/// Creating one removes any earlier output.
#[derive(Debug)]
pub(crate) struct PartFile {
    part: PathBuf,
    output: PathBuf,
    committed: bool,
}

impl PartFile {
    pub(crate) fn create(output: &Path) -> Result<Self> {
        let mut name = OsString::from(output.as_os_str());
        name.push(".part");
        let part = PathBuf::from(name);
        for stale in [part.as_path(), output] {
            if stale.exists() {
                fs::remove_file(stale)?;
            }
        }
        Ok(Self {
            part,
            output: output.to_path_buf(),
            committed: false,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.part
    }

    /// Moves the finished file over the output path.
    pub(crate) fn commit(mut self) -> Result<()> {
        fs::rename(&self.part, &self.output)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed || !self.part.exists() {
            return;
        }
        if let Err(e) = fs::remove_file(&self.part) {
            warn!("cannot remove partial output {}: {e}", self.part.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxstack_core::{ElementType, Loader, MemoryLoader, SliceSpec};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    // Cancels `cancel` on every load and notes whether `part` existed then.
    #[derive(Debug)]
    struct CancelOnLoad {
        inner: MemoryLoader,
        cancel: CancelToken,
        part: PathBuf,
        saw_part: AtomicBool,
    }

    impl Loader for CancelOnLoad {
        fn load(&self, spec: &SliceSpec) -> nxstack_core::Result<Data> {
            if self.part.exists() {
                self.saw_part.store(true, Ordering::SeqCst);
            }
            self.cancel.cancel();
            self.inner.load(spec)
        }
    }

    fn cancelling_item(len: usize, cancel: &CancelToken, part: PathBuf) -> (LazyDataset, Arc<CancelOnLoad>) {
        let values: Vec<f64> = (0..len).map(|i| i as f64).collect();
        let loader = Arc::new(CancelOnLoad {
            inner: MemoryLoader::new(Dataset::from_vec("counts", values).into_data()),
            cancel: cancel.clone(),
            part,
            saw_part: AtomicBool::new(false),
        });
        let lazy = LazyDataset::new("counts", ElementType::Float64, vec![len], loader.clone());
        (lazy, loader)
    }

    fn assert_cancelled_mid_run(grid: Option<ScanGrid>, count: u8) {
        let dir = tempdir().unwrap();
        let out = dir.path().join("midway.nxs");
        let part = dir.path().join("midway.nxs.part");
        fs::write(&out, b"earlier run").unwrap();

        let cancel = CancelToken::new();
        let (first, loader) = cancelling_item(3, &cancel, part.clone());
        let mut agg = StackAggregator::new().with_grid(grid);
        agg.add("counts", first);
        for i in 1..count {
            agg.add("counts", item(f64::from(i), 3));
        }

        let result = agg.finish(&out, &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(loader.saw_part.load(Ordering::SeqCst));
        assert!(!out.exists());
        assert!(!part.exists());
    }

    fn item(offset: f64, len: usize) -> LazyDataset {
        let values: Vec<f64> = (0..len).map(|i| offset + i as f64).collect();
        LazyDataset::from_dataset(Dataset::from_vec("counts", values))
    }

    fn read(path: &Path, name: &str) -> (Vec<usize>, Vec<f64>) {
        let file = hdf5::File::open(path).unwrap();
        let ds = file.dataset(name).unwrap();
        let data = Dataset::new(name, h5::read_data(&ds).unwrap());
        (data.shape().to_vec(), data.to_f64_vec().unwrap())
    }

    #[test]
    fn test_grid_fits() {
        assert!(ScanGrid::new(4, 3).fits(12));
        assert!(!ScanGrid::new(4, 3).fits(11));
        assert!(!ScanGrid::new(0, 3).fits(0));
    }

    #[test]
    fn test_sequential_stack() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("stack.nxs");

        let mut agg = StackAggregator::new();
        for i in 0..4u8 {
            agg.add("/entry1/counter/I0", item(f64::from(i) * 10.0, 5));
        }
        agg.set_axis("/entry1/counter/Energy", item(0.0, 5));
        agg.set_axis("/entry1/counter/Ignored", item(0.0, 2));
        assert_eq!(agg.count("/entry1/counter/I0"), 4);

        let written = agg.finish(&out, &CancelToken::new()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].shape, vec![4, 5]);
        assert!(written[0].signal);

        let (shape, values) = read(&out, "/entry1/counter/I0");
        assert_eq!(shape, vec![4, 5]);
        assert_eq!(values[5..10], [10.0, 11.0, 12.0, 13.0, 14.0]);
        assert_eq!(read(&out, "/entry1/counter/Energy").0, vec![5]);

        let file = hdf5::File::open(&out).unwrap();
        let ds = file.dataset("/entry1/counter/I0").unwrap();
        assert_eq!(
            h5::read_attr_rendered(&ds, ORIGINAL_NAME_ATTR).unwrap().as_deref(),
            Some("/entry1/counter/I0")
        );
        assert_eq!(h5::read_attr_rendered(&ds, "NX_class").unwrap().as_deref(), Some(NX_SDS));
        let axis = file.dataset("/entry1/counter/Energy").unwrap();
        assert_eq!(h5::read_attr_rendered(&axis, AXIS_ATTR).unwrap().as_deref(), Some("1"));
        assert!(file.dataset("/entry1/counter/Ignored").is_err());
    }

    #[test]
    fn test_banded_stack() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("grid.nxs");

        let mut agg = StackAggregator::new().with_grid(Some(ScanGrid::new(4, 3)));
        for i in 0..12u8 {
            agg.add("counts", item(f64::from(i), 3));
        }
        let written = agg.finish(&out, &CancelToken::new()).unwrap();
        assert_eq!(written[0].shape, vec![3, 4, 3]);
        assert!(!written[0].signal);

        let (shape, values) = read(&out, "/entry1/counts");
        assert_eq!(shape, vec![3, 4, 3]);
        // Band 1, item 2 was the seventh item added.
        let at = (4 + 2) * 3;
        assert_eq!(values[at..at + 3], [6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_grid_mismatch_falls_back() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("fallback.nxs");

        let mut agg = StackAggregator::new().with_grid(Some(ScanGrid::new(4, 3)));
        for i in 0..5u8 {
            agg.add("counts", item(f64::from(i), 3));
        }
        let written = agg.finish(&out, &CancelToken::new()).unwrap();
        assert_eq!(written[0].shape, vec![5, 3]);
    }

    #[test]
    fn test_mismatched_items_leave_nothing() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("bad.nxs");

        let mut agg = StackAggregator::new();
        agg.add("counts", item(0.0, 3));
        agg.add("counts", item(0.0, 4));
        assert!(agg.finish(&out, &CancelToken::new()).is_err());
        assert!(!out.exists());
        assert!(!dir.path().join("bad.nxs.part").exists());
    }

    #[test]
    fn test_cancelled_leaves_nothing() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("cancelled.nxs");

        let mut agg = StackAggregator::new();
        agg.add("counts", item(0.0, 3));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = agg.finish(&out, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!out.exists());
    }

    #[test]
    fn test_cancel_during_sequential_write() {
        assert_cancelled_mid_run(None, 4);
    }

    #[test]
    fn test_cancel_during_banded_write() {
        assert_cancelled_mid_run(Some(ScanGrid::new(2, 3)), 6);
    }
}
