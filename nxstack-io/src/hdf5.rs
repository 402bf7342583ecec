//! HDF5/NeXus helpers shared by the container, the stack writer and the loaders.
//!
//! Datasets move in and out of files as [`nxstack_core::Data`]; the element
//! type is chosen from the on-disk datatype. Stacks are datasets whose leading
//! dimension is extendable and grows one item at a time.

use crate::{Error, Result};
use hdf5::types::{FloatSize, H5Type, IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset as H5Dataset, Extent, Group, Location};
use ndarray::{ArrayD, ArrayView1, IxDyn, SliceInfo, SliceInfoElem};
use nxstack_core::{Data, ElementType, SliceRange, SliceSpec};
use std::str::FromStr;

pub const NX_CLASS: &str = "NX_class";
pub const NX_ENTRY: &str = "NXentry";
pub const NX_DATA: &str = "NXdata";
pub const NX_DETECTOR: &str = "NXdetector";
pub const NX_SDS: &str = "SDS";

type DynSlice = SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>;

/// Writes a scalar string attribute, overwriting an existing one.
///
/// # Errors
/// Returns an error if the value is not valid UTF-8 for HDF5 or the write fails.
pub fn set_attr_str(loc: &Location, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    if has_attr(loc, name)? {
        loc.attr(name)?.write_scalar(&value)?;
    } else {
        loc.new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&value)?;
    }
    Ok(())
}

/// Writes a string attribute as a one-element array, overwriting an existing one.
///
/// # Errors
/// Returns an error if the value is not valid UTF-8 for HDF5 or the write fails.
pub fn set_attr_str_array(loc: &Location, name: &str, value: &str) -> Result<()> {
    let values = [to_var_len_unicode(value)?];
    let attr = if has_attr(loc, name)? {
        loc.attr(name)?
    } else {
        loc.new_attr::<VarLenUnicode>().shape((1,)).create(name)?
    };
    attr.write(ArrayView1::from(&values[..]))?;
    Ok(())
}

/// Tags a group or dataset with its NeXus class.
///
/// # Errors
/// Returns an error if the attribute cannot be written.
pub fn set_nx_class(loc: &Location, class: &str) -> Result<()> {
    set_attr_str(loc, NX_CLASS, class)
}

/// Writes the `units` attribute of a dataset.
///
/// # Errors
/// Returns an error if the attribute cannot be written.
pub fn set_units(dataset: &H5Dataset, units: &str) -> Result<()> {
    set_attr_str(dataset, "units", units)
}

fn has_attr(loc: &Location, name: &str) -> Result<bool> {
    Ok(loc.attr_names()?.iter().any(|n| n == name))
}

/// Reads an attribute and renders it as text.
///
/// Scalars render as their value; arrays render as `[v1, v2, ...]`, so a
/// one-element string array comes back wrapped in a single bracket pair.
/// Returns `None` if the attribute is absent.
///
/// # Errors
/// Returns an error if the attribute exists but has an unsupported type.
pub fn read_attr_rendered(loc: &Location, name: &str) -> Result<Option<String>> {
    if !has_attr(loc, name)? {
        return Ok(None);
    }
    let attr = loc.attr(name)?;
    let values: Vec<String> = match attr.dtype()?.to_descriptor()? {
        TypeDescriptor::VarLenUnicode => attr
            .read_raw::<VarLenUnicode>()?
            .iter()
            .map(|v| v.as_str().to_string())
            .collect(),
        TypeDescriptor::VarLenAscii => attr
            .read_raw::<VarLenAscii>()?
            .iter()
            .map(|v| v.as_str().to_string())
            .collect(),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => attr
            .read_raw::<i64>()?
            .iter()
            .map(ToString::to_string)
            .collect(),
        TypeDescriptor::Float(_) => attr
            .read_raw::<f64>()?
            .iter()
            .map(ToString::to_string)
            .collect(),
        other => {
            return Err(Error::InvalidFormat(format!(
                "unsupported type {other:?} for attribute {name}"
            )))
        }
    };
    if attr.shape().is_empty() {
        Ok(Some(values.concat()))
    } else {
        Ok(Some(format!("[{}]", values.join(", "))))
    }
}

/// Opens `name` under `parent`, creating it with `nx_class` if absent.
///
/// # Errors
/// Returns an error if the group cannot be opened or created.
pub fn ensure_group(parent: &Group, name: &str, nx_class: &str) -> Result<Group> {
    if parent.link_exists(name) {
        return Ok(parent.group(name)?);
    }
    let group = parent.create_group(name)?;
    set_nx_class(&group, nx_class)?;
    Ok(group)
}

/// Walks a slash-separated path, creating missing groups. Intermediate groups
/// get `intermediate_class`, the last one `leaf_class`.
///
/// # Errors
/// Returns an error if the path is empty or a group cannot be created.
pub fn ensure_group_path(
    root: &Group,
    path: &str,
    intermediate_class: &str,
    leaf_class: &str,
) -> Result<Group> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let Some((last, init)) = parts.split_last() else {
        return Err(Error::InvalidArgument(format!("empty group path '{path}'")));
    };
    let mut group = root.clone();
    for part in init {
        group = ensure_group(&group, part, intermediate_class)?;
    }
    ensure_group(&group, last, leaf_class)
}

/// Opens a group by slash-separated path, returning `None` if any part is missing.
#[must_use]
pub fn group_opt(root: &Group, path: &str) -> Option<Group> {
    let mut group = root.clone();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if !group.link_exists(part) {
            return None;
        }
        group = group.group(part).ok()?;
    }
    Some(group)
}

/// Sorted names of the members of `group`.
///
/// # Errors
/// Returns an error if the group cannot be listed.
pub fn member_names(group: &Group) -> Result<Vec<String>> {
    let mut names = group.member_names()?;
    names.sort();
    Ok(names)
}

/// Maps the on-disk datatype of a dataset to an element type.
///
/// Unsigned types widen to the next signed type that holds them.
///
/// # Errors
/// Returns an error for compound, array or fixed-length string types.
pub fn element_type(dataset: &H5Dataset) -> Result<ElementType> {
    match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::Boolean => Ok(ElementType::Bool),
        TypeDescriptor::Integer(IntSize::U1) => Ok(ElementType::Int8),
        TypeDescriptor::Integer(IntSize::U2 | IntSize::U4)
        | TypeDescriptor::Unsigned(IntSize::U1 | IntSize::U2) => Ok(ElementType::Int32),
        TypeDescriptor::Integer(IntSize::U8) | TypeDescriptor::Unsigned(IntSize::U4 | IntSize::U8) => {
            Ok(ElementType::Int64)
        }
        TypeDescriptor::Float(FloatSize::U4) => Ok(ElementType::Float32),
        TypeDescriptor::Float(FloatSize::U8) => Ok(ElementType::Float64),
        TypeDescriptor::VarLenUnicode | TypeDescriptor::VarLenAscii => Ok(ElementType::String),
        other => Err(Error::InvalidFormat(format!(
            "unsupported datatype {other:?} in dataset {}",
            dataset.name()
        ))),
    }
}

/// Reads a whole dataset.
///
/// # Errors
/// Returns an error if the datatype is unsupported or the read fails.
pub fn read_data(dataset: &H5Dataset) -> Result<Data> {
    read_region(dataset, None)
}

/// Reads the hyper-rectangle `spec` of a dataset.
///
/// # Errors
/// Returns an error if `spec` does not fit, the datatype is unsupported or
/// the read fails.
pub fn read_data_slice(dataset: &H5Dataset, spec: &SliceSpec) -> Result<Data> {
    spec.validate(&dataset.shape())?;
    read_region(dataset, Some(&selection(spec.ranges())?))
}

fn read_region(dataset: &H5Dataset, sel: Option<&DynSlice>) -> Result<Data> {
    let data = match element_type(dataset)? {
        ElementType::Bool => Data::Bool(read_typed(dataset, sel)?),
        ElementType::Int8 => Data::Int8(read_typed(dataset, sel)?),
        ElementType::Int32 => Data::Int32(read_typed(dataset, sel)?),
        ElementType::Int64 => Data::Int64(read_typed(dataset, sel)?),
        ElementType::Float32 => Data::Float32(read_typed(dataset, sel)?),
        ElementType::Float64 => Data::Float64(read_typed(dataset, sel)?),
        ElementType::String => {
            if matches!(dataset.dtype()?.to_descriptor()?, TypeDescriptor::VarLenAscii) {
                Data::String(read_typed::<VarLenAscii>(dataset, sel)?.map(|v| v.as_str().to_string()))
            } else {
                Data::String(read_typed::<VarLenUnicode>(dataset, sel)?.map(|v| v.as_str().to_string()))
            }
        }
    };
    Ok(data)
}

fn read_typed<T: H5Type>(dataset: &H5Dataset, sel: Option<&DynSlice>) -> Result<ArrayD<T>> {
    match sel {
        None => Ok(dataset.read_dyn::<T>()?),
        Some(sel) => Ok(dataset.read_slice::<T, _, IxDyn>(sel.clone())?),
    }
}

/// Creates (or replaces) a fixed-shape dataset holding `data`.
///
/// # Errors
/// Returns an error if the dataset cannot be created or written.
pub fn replace_dataset(group: &Group, name: &str, data: &Data) -> Result<H5Dataset> {
    if group.link_exists(name) {
        group.unlink(name)?;
    }
    match data {
        Data::Bool(a) => create_filled(group, name, a),
        Data::Int8(a) => create_filled(group, name, a),
        Data::Int32(a) => create_filled(group, name, a),
        Data::Int64(a) => create_filled(group, name, a),
        Data::Float32(a) => create_filled(group, name, a),
        Data::Float64(a) => create_filled(group, name, a),
        Data::String(a) => create_filled(group, name, &to_var_len_array(a)?),
    }
}

fn create_filled<T: H5Type>(group: &Group, name: &str, array: &ArrayD<T>) -> Result<H5Dataset> {
    let dataset = group
        .new_dataset::<T>()
        .shape(array.shape().to_vec())
        .create(name)?;
    if !array.is_empty() {
        dataset.write(array.view())?;
    }
    Ok(dataset)
}

/// Creates (or replaces) an empty stack dataset of shape `(0, item_shape...)`
/// whose leading dimension is extendable.
///
/// # Errors
/// Returns an error if the dataset cannot be created.
pub fn create_stack_dataset(
    group: &Group,
    name: &str,
    element_type: ElementType,
    item_shape: &[usize],
) -> Result<H5Dataset> {
    if group.link_exists(name) {
        group.unlink(name)?;
    }
    match element_type {
        ElementType::Bool => create_extendable::<bool>(group, name, item_shape),
        ElementType::Int8 => create_extendable::<i8>(group, name, item_shape),
        ElementType::Int32 => create_extendable::<i32>(group, name, item_shape),
        ElementType::Int64 => create_extendable::<i64>(group, name, item_shape),
        ElementType::Float32 => create_extendable::<f32>(group, name, item_shape),
        ElementType::Float64 => create_extendable::<f64>(group, name, item_shape),
        ElementType::String => create_extendable::<VarLenUnicode>(group, name, item_shape),
    }
}

fn create_extendable<T: H5Type>(group: &Group, name: &str, item_shape: &[usize]) -> Result<H5Dataset> {
    let mut extents = vec![Extent::resizable(0)];
    extents.extend(item_shape.iter().map(|&d| Extent::fixed(d)));
    let mut chunk = vec![1];
    chunk.extend(item_shape.iter().map(|&d| d.max(1)));

    Ok(group
        .new_dataset::<T>()
        .shape(extents)
        .chunk(chunk)
        .create(name)?)
}

/// Appends one item to a stack dataset, growing the leading dimension by one.
/// Returns the new length.
///
/// # Errors
/// Returns an error if the item shape differs from the stack's trailing
/// dimensions or the write fails.
pub fn append_item(dataset: &H5Dataset, item: &Data) -> Result<usize> {
    let mut shape = dataset.shape();
    let Some(&offset) = shape.first() else {
        return Err(Error::InvalidArgument(format!(
            "cannot append to scalar dataset {}",
            dataset.name()
        )));
    };
    if item.shape() != &shape[1..] {
        return Err(Error::InvalidArgument(format!(
            "item shape {:?} does not match stack {} of shape {:?}",
            item.shape(),
            dataset.name(),
            shape
        )));
    }

    let new_len = offset + 1;
    shape[0] = new_len;
    dataset.resize(shape.clone())?;

    let mut ranges = vec![SliceRange::new(offset, new_len, 1)];
    ranges.extend(item.shape().iter().map(|&d| SliceRange::full(d)));
    let sel = selection(&ranges)?;

    let mut block_shape = vec![1];
    block_shape.extend_from_slice(item.shape());
    let block = item.clone().into_shape(&block_shape)?;
    write_block(dataset, &block, sel)?;
    Ok(new_len)
}

fn write_block(dataset: &H5Dataset, data: &Data, sel: DynSlice) -> Result<()> {
    match data {
        Data::Bool(a) => dataset.write_slice(a.view(), sel)?,
        Data::Int8(a) => dataset.write_slice(a.view(), sel)?,
        Data::Int32(a) => dataset.write_slice(a.view(), sel)?,
        Data::Int64(a) => dataset.write_slice(a.view(), sel)?,
        Data::Float32(a) => dataset.write_slice(a.view(), sel)?,
        Data::Float64(a) => dataset.write_slice(a.view(), sel)?,
        Data::String(a) => dataset.write_slice(to_var_len_array(a)?.view(), sel)?,
    }
    Ok(())
}

fn selection(ranges: &[SliceRange]) -> Result<DynSlice> {
    let elems = ranges
        .iter()
        .map(|r| {
            Ok(SliceInfoElem::Slice {
                start: to_isize(r.start)?,
                end: Some(to_isize(r.stop)?),
                step: to_isize(r.step)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DynSlice::try_from(elems)?)
}

fn to_isize(value: usize) -> Result<isize> {
    isize::try_from(value).map_err(|_| Error::InvalidArgument(format!("index {value} too large")))
}

fn to_var_len_array(array: &ArrayD<String>) -> Result<ArrayD<VarLenUnicode>> {
    let values = array
        .iter()
        .map(|s| to_var_len_unicode(s))
        .collect::<Result<Vec<_>>>()?;
    Ok(ArrayD::from_shape_vec(array.raw_dim(), values)?)
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdf5::File;
    use nxstack_core::Dataset;
    use tempfile::NamedTempFile;

    #[test]
    fn test_attr_rendering() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();
        let group = file.create_group("entry").unwrap();

        set_attr_str(&group, "scalar", "plain").unwrap();
        set_attr_str_array(&group, "array", "{\"a\":1}").unwrap();
        set_attr_str_array(&group, "array", "{\"a\":2}").unwrap();

        assert_eq!(read_attr_rendered(&group, "scalar").unwrap().as_deref(), Some("plain"));
        assert_eq!(
            read_attr_rendered(&group, "array").unwrap().as_deref(),
            Some("[{\"a\":2}]")
        );
        assert!(read_attr_rendered(&group, "missing").unwrap().is_none());
    }

    #[test]
    fn test_group_paths() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();

        let leaf = ensure_group_path(&file, "/entry1/counter/", NX_ENTRY, NX_DATA).unwrap();
        assert_eq!(read_attr_rendered(&leaf, NX_CLASS).unwrap().as_deref(), Some(NX_DATA));
        let mid = group_opt(&file, "entry1").unwrap();
        assert_eq!(read_attr_rendered(&mid, NX_CLASS).unwrap().as_deref(), Some(NX_ENTRY));

        assert!(group_opt(&file, "entry1/missing").is_none());
        assert!(ensure_group_path(&file, "//", NX_ENTRY, NX_DATA).is_err());
    }

    #[test]
    fn test_replace_and_read_back() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();
        let group = file.create_group("g").unwrap();

        let first = Dataset::from_vec("d", vec![1.0f64, 2.0]).into_data();
        replace_dataset(&group, "d", &first).unwrap();
        let second = Dataset::from_shape_vec("d", &[2, 2], vec![1i32, 2, 3, 4]).unwrap().into_data();
        let ds = replace_dataset(&group, "d", &second).unwrap();

        assert_eq!(element_type(&ds).unwrap(), ElementType::Int32);
        assert_eq!(read_data(&ds).unwrap(), second);

        let names = Dataset::from_vec("s", vec!["a".to_string(), "bc".to_string()]).into_data();
        let ds = replace_dataset(&group, "s", &names).unwrap();
        assert_eq!(read_data(&ds).unwrap(), names);
    }

    #[test]
    fn test_unsigned_widens() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();
        let ds = file.new_dataset::<u16>().shape(vec![3]).create("u").unwrap();
        ds.write(ArrayView1::from(&[1u16, 2, 65535][..])).unwrap();

        assert_eq!(element_type(&ds).unwrap(), ElementType::Int32);
        let Data::Int32(a) = read_data(&ds).unwrap() else { panic!("wrong type") };
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![1, 2, 65535]);
    }

    #[test]
    fn test_stack_append_and_slice() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();
        let ds = create_stack_dataset(&file, "stack", ElementType::Float64, &[2, 3]).unwrap();
        assert_eq!(ds.shape(), vec![0, 2, 3]);

        for i in 0..3u8 {
            let values: Vec<f64> = (0..6).map(|v| f64::from(i * 10 + v)).collect();
            let item = Dataset::from_shape_vec("x", &[2, 3], values).unwrap().into_data();
            assert_eq!(append_item(&ds, &item).unwrap(), usize::from(i) + 1);
        }
        assert_eq!(ds.shape(), vec![3, 2, 3]);

        let spec = SliceSpec::new(vec![
            SliceRange::new(0, 3, 2),
            SliceRange::index(1),
            SliceRange::full(3),
        ]);
        let Data::Float64(a) = read_data_slice(&ds, &spec).unwrap() else { panic!("wrong type") };
        assert_eq!(a.shape(), &[2, 1, 3]);
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0, 23.0, 24.0, 25.0]);

        let wrong = Dataset::from_vec("x", vec![1.0f64; 6]).into_data();
        assert!(matches!(append_item(&ds, &wrong), Err(Error::InvalidArgument(_))));
    }
}
