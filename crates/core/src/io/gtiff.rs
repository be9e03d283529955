//! Native GeoTIFF reading/writing
//!
//! Every band is stored as its own image file directory. Georeferencing goes
//! into the usual GeoTIFF tags; everything the tags cannot carry (projection
//! text, band names, color tables, metadata domains) is kept in a
//! `<file>.aux.json` sidecar next to the image.

use crate::crs::Projection;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::io::{Compression, MemRaster, RasterDataset, RasterMetadata};
use crate::raster::{BandBuffer, DataType, GeoTransform};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::compression::{Compression as TiffCompression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffValue};
use tempfile::NamedTempFile;
use tiff::tags::Tag;
use tracing::debug;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Sidecar content
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuxInfo {
    projection: Projection,
    data_type: DataType,
    #[serde(default)]
    metadata: RasterMetadata,
}

fn sidecar_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".aux.json");
    name.into()
}

/// Read a GeoTIFF (all bands) into memory
pub fn read_gtiff<P: AsRef<Path>>(path: P) -> Result<MemRaster> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);
    let transform = read_geotransform(&mut decoder)?;
    let tag_projection = read_projection(&mut decoder)?;
    let tag_no_data = read_no_data(&mut decoder)?;

    let mut images = Vec::new();
    loop {
        if decoder.dimensions()? != (width, height) {
            return Err(Error::dataset(format!(
                "band {} of '{}' differs in size from band 1",
                images.len() + 1,
                path.display()
            )));
        }
        let image = decoder.read_image()?;
        if image_len(&image) != Some(rows * cols) {
            return Err(Error::dataset(format!("truncated or unsupported band in '{}'", path.display())));
        }
        images.push(image);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    let band_count = images.len();
    let buffer = stack_images(images, (band_count, rows, cols))
        .ok_or_else(|| Error::dataset(format!("bands of '{}' differ in sample format", path.display())))?;

    let aux_path = sidecar_path(path);
    let aux: Option<AuxInfo> = if aux_path.is_file() {
        Some(serde_json::from_reader(BufReader::new(File::open(&aux_path)?))?)
    } else {
        None
    };
    let (projection, metadata) = match aux {
        Some(aux) => (aux.projection, aux.metadata),
        None => {
            let mut metadata = RasterMetadata::with_bands(band_count);
            for band in 0..band_count {
                metadata.band_mut(band).no_data_value = tag_no_data;
            }
            (tag_projection.unwrap_or_else(Projection::wgs84), metadata)
        }
    };

    let grid = Grid::from_geo_transform(&transform, cols, rows, projection)?;
    debug!("Read {} ({} band(s), {}x{})", path.display(), band_count, rows, cols);
    let mut raster = MemRaster::from_buffer(grid, buffer)?.with_metadata(metadata);
    raster.set_filename(&path.to_string_lossy());
    Ok(raster)
}

fn image_len(image: &DecodingResult) -> Option<usize> {
    Some(match image {
        DecodingResult::U8(buf) => buf.len(),
        DecodingResult::U16(buf) => buf.len(),
        DecodingResult::I8(buf) => buf.len(),
        DecodingResult::I16(buf) => buf.len(),
        DecodingResult::U32(buf) => buf.len(),
        DecodingResult::I32(buf) => buf.len(),
        DecodingResult::F32(buf) => buf.len(),
        DecodingResult::F64(buf) => buf.len(),
        _ => return None,
    })
}

/// Concatenate decoded bands in the sample format of the first one, which
/// every band must share. `I8` is widened to `I16`.
fn stack_images(images: Vec<DecodingResult>, shape: (usize, usize, usize)) -> Option<BandBuffer> {
    fn gather<T>(images: Vec<DecodingResult>, shape: (usize, usize, usize), pick: impl Fn(DecodingResult) -> Option<Vec<T>>) -> Option<Array3<T>> {
        let mut values = Vec::with_capacity(shape.0 * shape.1 * shape.2);
        for image in images {
            values.extend(pick(image)?);
        }
        Array3::from_shape_vec(shape, values).ok()
    }
    Some(match images.first()? {
        DecodingResult::U8(_) => BandBuffer::U8(gather(images, shape, |i| match i {
            DecodingResult::U8(buf) => Some(buf),
            _ => None,
        })?),
        DecodingResult::U16(_) => BandBuffer::U16(gather(images, shape, |i| match i {
            DecodingResult::U16(buf) => Some(buf),
            _ => None,
        })?),
        DecodingResult::I8(_) => BandBuffer::I16(gather(images, shape, |i| match i {
            DecodingResult::I8(buf) => Some(buf.into_iter().map(i16::from).collect()),
            _ => None,
        })?),
        DecodingResult::I16(_) => BandBuffer::I16(gather(images, shape, |i| match i {
            DecodingResult::I16(buf) => Some(buf),
            _ => None,
        })?),
        DecodingResult::U32(_) => BandBuffer::U32(gather(images, shape, |i| match i {
            DecodingResult::U32(buf) => Some(buf),
            _ => None,
        })?),
        DecodingResult::I32(_) => BandBuffer::I32(gather(images, shape, |i| match i {
            DecodingResult::I32(buf) => Some(buf),
            _ => None,
        })?),
        DecodingResult::F32(_) => BandBuffer::F32(gather(images, shape, |i| match i {
            DecodingResult::F32(buf) => Some(buf),
            _ => None,
        })?),
        DecodingResult::F64(_) => BandBuffer::F64(gather(images, shape, |i| match i {
            DecodingResult::F64(buf) => Some(buf),
            _ => None,
        })?),
        _ => return None,
    })
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder.find_tag(tag(MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.find_tag(tag(MODEL_TIEPOINT))?;
    let (Some(scale), Some(tiepoint)) = (scale, tiepoint) else {
        return Err(Error::dataset("GeoTIFF lacks pixel scale / tiepoint tags"));
    };
    let scale = scale.into_f64_vec()?;
    let tiepoint = tiepoint.into_f64_vec()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(Error::dataset("malformed GeoTIFF georeferencing tags"));
    }
    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_projection<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<Projection>> {
    let Some(keys) = decoder.find_tag(tag(GEO_KEY_DIRECTORY))? else {
        return Ok(None);
    };
    let keys = keys.into_u16_vec()?;
    // header of 4 shorts, then entries of (key, location, count, value)
    Ok(keys
        .get(4..)
        .unwrap_or_default()
        .chunks_exact(4)
        .find(|entry| (entry[0] == PROJECTED_CS_TYPE || entry[0] == GEOGRAPHIC_TYPE) && entry[1] == 0)
        .map(|entry| Projection::from_epsg(entry[3] as u32)))
}

fn read_no_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    Ok(match decoder.find_tag(tag(GDAL_NODATA))? {
        Some(value) => value.into_string()?.trim_matches(char::from(0)).trim().parse().ok(),
        None => None,
    })
}

/// Write `raster` as a GeoTIFF at `path` plus its `.aux.json` sidecar
pub fn write_gtiff<P: AsRef<Path>>(raster: &MemRaster, path: P, compression: Compression) -> Result<()> {
    let path = path.as_ref();
    stage_gtiff(path, raster.grid(), raster.buffer(), raster.metadata(), compression)?.persist(path)
}

/// A GeoTIFF and its sidecar, encoded into temporary files in the directory
/// of their destination. Dropping it deletes both.
#[derive(Debug)]
pub struct StagedGtiff {
    image: NamedTempFile,
    sidecar: NamedTempFile,
}

impl StagedGtiff {
    /// Move both files to their final names. A failed sidecar move removes
    /// the moved image again.
    pub fn persist(self, path: &Path) -> Result<()> {
        self.image.persist(path).map_err(|e| Error::Io(e.error))?;
        if let Err(e) = self.sidecar.persist(sidecar_path(path)) {
            std::fs::remove_file(path)?;
            return Err(Error::Io(e.error));
        }
        debug!("Published {}", path.display());
        Ok(())
    }
}

fn temp_file_near(path: &Path, suffix: &str) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(tempfile::Builder::new().prefix(".hubflow-").suffix(suffix).tempfile_in(dir)?)
}

/// Encode pixels and sidecar for `path` without touching `path` itself.
pub fn stage_gtiff(
    path: &Path,
    grid: &Grid,
    buffer: &BandBuffer,
    metadata: &RasterMetadata,
    compression: Compression,
) -> Result<StagedGtiff> {
    let mut image = temp_file_near(path, ".tif")?;
    {
        let mut writer = BufWriter::new(image.as_file_mut());
        let mut encoder = TiffEncoder::new(&mut writer)?;
        let tags = GeoTags::new(grid, metadata);
        match compression {
            Compression::None => write_bands(&mut encoder, buffer, &tags, || Uncompressed)?,
            Compression::Deflate => write_bands(&mut encoder, buffer, &tags, Deflate::default)?,
            Compression::Lzw => write_bands(&mut encoder, buffer, &tags, Lzw::default)?,
        }
        drop(encoder);
        writer.flush()?;
    }

    let aux = AuxInfo {
        projection: grid.projection().clone(),
        data_type: buffer.data_type(),
        metadata: metadata.clone(),
    };
    let mut sidecar = temp_file_near(path, ".aux.json")?;
    {
        let mut writer = BufWriter::new(sidecar.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, &aux)?;
        writer.flush()?;
    }
    debug!("Encoded {} ({:?}, {} bytes of pixels)", path.display(), compression, buffer.byte_size());
    Ok(StagedGtiff { image, sidecar })
}

struct GeoTags {
    scale: [f64; 3],
    tiepoint: [f64; 6],
    geokeys: Vec<u16>,
    no_data: Option<String>,
}

impl GeoTags {
    fn new(grid: &Grid, metadata: &RasterMetadata) -> Self {
        let gt = grid.geo_transform();
        let mut geokeys: Vec<u16> = vec![1, 1, 0, 2, GT_RASTER_TYPE, 0, 1, 1];
        match grid.projection().epsg().and_then(|c| u16::try_from(c).ok()) {
            Some(code) if (4000..5000).contains(&code) => {
                geokeys.extend([GT_MODEL_TYPE, 0, 1, 2, GEOGRAPHIC_TYPE, 0, 1, code]);
            }
            Some(code) => geokeys.extend([GT_MODEL_TYPE, 0, 1, 1, PROJECTED_CS_TYPE, 0, 1, code]),
            None => geokeys.extend([GT_MODEL_TYPE, 0, 1, 1]),
        }
        // keys must be sorted by id
        let mut entries: Vec<[u16; 4]> = geokeys[4..]
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        entries.sort_by_key(|e| e[0]);
        let mut sorted = vec![1, 1, 0, entries.len() as u16];
        sorted.extend(entries.into_iter().flatten());

        Self {
            scale: [gt.pixel_width, gt.pixel_height.abs(), 0.0],
            tiepoint: [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0],
            geokeys: sorted,
            no_data: metadata
                .bands
                .first()
                .and_then(|band| band.no_data_value)
                .map(|v| v.to_string()),
        }
    }
}

fn write_bands<W, D, F>(encoder: &mut TiffEncoder<W>, buffer: &BandBuffer, tags: &GeoTags, compression: F) -> Result<()>
where
    W: Write + Seek,
    D: TiffCompression,
    F: Fn() -> D,
{
    match buffer {
        BandBuffer::U8(data) => write_images::<W, colortype::Gray8, D>(encoder, data, tags, &compression),
        BandBuffer::U16(data) => write_images::<W, colortype::Gray16, D>(encoder, data, tags, &compression),
        BandBuffer::I16(data) => write_images::<W, colortype::GrayI16, D>(encoder, data, tags, &compression),
        BandBuffer::U32(data) => write_images::<W, colortype::Gray32, D>(encoder, data, tags, &compression),
        BandBuffer::I32(data) => write_images::<W, colortype::GrayI32, D>(encoder, data, tags, &compression),
        BandBuffer::F32(data) => write_images::<W, colortype::Gray32Float, D>(encoder, data, tags, &compression),
        BandBuffer::F64(data) => write_images::<W, colortype::Gray64Float, D>(encoder, data, tags, &compression),
    }
}

fn write_images<W, C, D>(
    encoder: &mut TiffEncoder<W>,
    data: &Array3<C::Inner>,
    tags: &GeoTags,
    compression: &dyn Fn() -> D,
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    C::Inner: Copy,
    [C::Inner]: TiffValue,
    D: TiffCompression,
{
    let (_, rows, cols) = data.dim();
    for band in data.outer_iter() {
        let values: Vec<C::Inner> = band.iter().copied().collect();
        let mut image = encoder.new_image_with_compression::<C, D>(cols as u32, rows as u32, compression())?;
        let dir = image.encoder();
        dir.write_tag(tag(MODEL_PIXEL_SCALE), &tags.scale[..])?;
        dir.write_tag(tag(MODEL_TIEPOINT), &tags.tiepoint[..])?;
        dir.write_tag(tag(GEO_KEY_DIRECTORY), tags.geokeys.as_slice())?;
        if let Some(no_data) = &tags.no_data {
            dir.write_tag(tag(GDAL_NODATA), no_data.as_str())?;
        }
        image.write_data(&values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{PixelWindow, Resolution};
    use crate::io::Color;
    use ndarray::Array3;

    fn raster(data_type: DataType) -> MemRaster {
        let grid = Grid::from_origin(
            500_000.0,
            4_100_000.0,
            Resolution::square(30.0),
            5,
            3,
            Projection::from_epsg(32633),
        )
        .unwrap();
        let data = Array3::from_shape_fn((2, 3, 5), |(b, r, c)| (b * 100 + r * 5 + c) as f64);
        let mut raster = MemRaster::new(grid, data, data_type).unwrap().with_no_data_value(Some(0.0));
        raster.metadata_mut().band_mut(0).description = Some("red".into());
        raster.metadata_mut().band_mut(1).color_table = Some(vec![Color::BLACK, Color::new(0, 255, 0)]);
        raster
    }

    #[test]
    fn test_write_read_bands_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let original = raster(DataType::I16);
        write_gtiff(&original, &path, Compression::Deflate).unwrap();

        let read = read_gtiff(&path).unwrap();
        assert_eq!(read.band_count(), 2);
        assert_eq!(read.data_type(), DataType::I16);
        assert!(read.grid().equal(original.grid()));
        assert_eq!(read.metadata(), original.metadata());
        let band = read.read_band_window(1, PixelWindow::full(3, 5)).unwrap();
        assert_eq!(band[(2, 4)], 114.0);
    }

    #[test]
    fn test_without_sidecar_uses_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tif");
        write_gtiff(&raster(DataType::F32), &path, Compression::None).unwrap();
        std::fs::remove_file(sidecar_path(&path)).unwrap();

        let read = read_gtiff(&path).unwrap();
        assert_eq!(read.grid().projection().epsg(), Some(32633));
        assert_eq!(read.data_type(), DataType::F32);
        assert_eq!(read.no_data_values(), vec![Some(0.0), Some(0.0)]);
        assert_eq!(read.grid().extent().xmin, 500_000.0);
    }

    #[test]
    fn test_staged_files_only_appear_on_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged.tif");
        let r = raster(DataType::U8);
        let staged = stage_gtiff(&path, r.grid(), r.buffer(), r.metadata(), Compression::Lzw).unwrap();
        assert!(!path.exists());
        staged.persist(&path).unwrap();
        assert!(path.is_file() && sidecar_path(&path).is_file());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        let dropped = dir.path().join("dropped.tif");
        drop(stage_gtiff(&dropped, r.grid(), r.buffer(), r.metadata(), Compression::None).unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_staging_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.tif");
        let r = raster(DataType::F32);
        assert!(matches!(
            stage_gtiff(&path, r.grid(), r.buffer(), r.metadata(), Compression::None),
            Err(Error::Io(_))
        ));
    }
}
