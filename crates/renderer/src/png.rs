//! PNG encoding for rendered tiles.
//!
//! Dot tiles are mostly transparent with a handful of blended colours, so the
//! encoder first tries an indexed image (color type 3, with a tRNS chunk for
//! alpha) and falls back to truecolour RGBA (color type 6) once the tile has
//! more than 256 distinct colours.

use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Write;

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

/// Minimum pixels to benefit from parallel palette extraction
const PARALLEL_THRESHOLD: usize = 4096; // 64x64 or larger

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

type Palette = Vec<(u8, u8, u8, u8)>;

/// Encode RGBA pixels, choosing indexed or truecolour output.
pub fn create_png_auto(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, String> {
    check_len(pixels.len(), width, height, 4)?;

    let palette = if pixels.len() / 4 >= PARALLEL_THRESHOLD {
        extract_palette_parallel(pixels)
    } else {
        extract_palette_sequential(pixels)
    };

    match palette {
        Some((palette, indices)) => create_png_indexed(width, height, &palette, &indices),
        None => create_png(pixels, width, height),
    }
}

#[inline(always)]
fn pack_color(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_le_bytes([r, g, b, a])
}

#[inline(always)]
fn unpack_color(packed: u32) -> (u8, u8, u8, u8) {
    let [r, g, b, a] = packed.to_le_bytes();
    (r, g, b, a)
}

/// Palette extraction in a single pass; `None` past 256 colours.
fn extract_palette_sequential(pixels: &[u8]) -> Option<(Palette, Vec<u8>)> {
    let mut color_to_index: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Palette = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices: Vec<u8> = Vec::with_capacity(pixels.len() / 4);

    for px in pixels.chunks_exact(4) {
        let packed = pack_color(px[0], px[1], px[2], px[3]);
        let index = match color_to_index.get(&packed) {
            Some(&idx) => idx,
            None => {
                if palette.len() >= MAX_PALETTE_SIZE {
                    return None;
                }
                let idx = palette.len() as u8;
                palette.push((px[0], px[1], px[2], px[3]));
                color_to_index.insert(packed, idx);
                idx
            }
        };
        indices.push(index);
    }

    Some((palette, indices))
}

/// Palette extraction for larger tiles.
///
/// Colours are gathered per chunk on the rayon pool, merged into one palette,
/// then pixels are mapped to indices in parallel.
fn extract_palette_parallel(pixels: &[u8]) -> Option<(Palette, Vec<u8>)> {
    let chunk_pixels = (pixels.len() / 4 / rayon::current_num_threads()).max(256);

    let unique: Vec<u32> = pixels
        .par_chunks(chunk_pixels * 4)
        .flat_map(|chunk| {
            let mut local: HashMap<u32, ()> = HashMap::with_capacity(MAX_PALETTE_SIZE);
            for px in chunk.chunks_exact(4) {
                local.insert(pack_color(px[0], px[1], px[2], px[3]), ());
                if local.len() > MAX_PALETTE_SIZE {
                    break;
                }
            }
            local.into_keys().collect::<Vec<_>>()
        })
        .collect();

    let mut lookup: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Palette = Vec::with_capacity(MAX_PALETTE_SIZE);
    for packed in unique {
        if lookup.contains_key(&packed) {
            continue;
        }
        if palette.len() >= MAX_PALETTE_SIZE {
            return None;
        }
        lookup.insert(packed, palette.len() as u8);
        palette.push(unpack_color(packed));
    }

    let indices: Vec<u8> = pixels
        .par_chunks_exact(4)
        .map(|px| {
            lookup
                .get(&pack_color(px[0], px[1], px[2], px[3]))
                .copied()
                .unwrap_or(0)
        })
        .collect();

    Some((palette, indices))
}

/// Encode an indexed PNG (color type 3) from a palette and one index per pixel.
pub fn create_png_indexed(
    width: usize,
    height: usize,
    palette: &[(u8, u8, u8, u8)],
    indices: &[u8],
) -> Result<Vec<u8>, String> {
    check_len(indices.len(), width, height, 1)?;
    if palette.is_empty() || palette.len() > MAX_PALETTE_SIZE {
        return Err(format!("palette has {} entries", palette.len()));
    }

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &ihdr(width, height, 3));

    let plte: Vec<u8> = palette.iter().flat_map(|&(r, g, b, _)| [r, g, b]).collect();
    write_chunk(&mut png, b"PLTE", &plte);

    if palette.iter().any(|&(_, _, _, a)| a < 255) {
        let trns: Vec<u8> = palette.iter().map(|&(_, _, _, a)| a).collect();
        write_chunk(&mut png, b"tRNS", &trns);
    }

    let idat = deflate_scanlines(indices, width, height)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat);
    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

/// Encode a truecolour PNG (color type 6) from RGBA pixels.
pub fn create_png(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, String> {
    check_len(pixels.len(), width, height, 4)?;

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut png, b"IHDR", &ihdr(width, height, 6));

    let idat = deflate_scanlines(pixels, width * 4, height)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat);
    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

fn check_len(len: usize, width: usize, height: usize, bytes_per_pixel: usize) -> Result<(), String> {
    if width == 0 || height == 0 {
        return Err(format!("empty image {}x{}", width, height));
    }
    let expected = width * height * bytes_per_pixel;
    if len != expected {
        return Err(format!(
            "buffer holds {} bytes, {}x{} image needs {}",
            len, width, height, expected
        ));
    }
    Ok(())
}

fn ihdr(width: usize, height: usize, color_type: u8) -> Vec<u8> {
    let mut data = Vec::with_capacity(13);
    data.extend_from_slice(&(width as u32).to_be_bytes());
    data.extend_from_slice(&(height as u32).to_be_bytes());
    data.push(8); // bit depth
    data.push(color_type);
    data.push(0); // compression method
    data.push(0); // filter method
    data.push(0); // interlace method
    data
}

/// Length, type, data, CRC over type + data.
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Prefix each `stride`-byte row with filter type 0 and zlib-compress.
fn deflate_scanlines(data: &[u8], stride: usize, height: usize) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(height * (1 + stride));
    for row in data.chunks_exact(stride).take(height) {
        raw.push(0);
        raw.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&raw)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_with_dots(size: usize, dots: &[(usize, usize, [u8; 4])]) -> Vec<u8> {
        let mut pixels = vec![0u8; size * size * 4];
        for &(x, y, rgba) in dots {
            let idx = (y * size + x) * 4;
            pixels[idx..idx + 4].copy_from_slice(&rgba);
        }
        pixels
    }

    #[test]
    fn test_extract_palette_transparent_tile() {
        let pixels = vec![0u8; 16 * 16 * 4];
        let (palette, indices) = extract_palette_sequential(&pixels).unwrap();
        assert_eq!(palette, vec![(0, 0, 0, 0)]);
        assert!(indices.iter().all(|&i| i == 0));
    }

    #[test]
    fn test_extract_palette_keeps_first_seen_order() {
        let pixels = tile_with_dots(4, &[(1, 0, [220, 20, 60, 102]), (2, 0, [220, 20, 60, 255])]);
        let (palette, indices) = extract_palette_sequential(&pixels).unwrap();
        assert_eq!(palette.len(), 3);
        assert_eq!(palette[1], (220, 20, 60, 102));
        assert_eq!(&indices[..4], &[0, 1, 2, 0]);
    }

    #[test]
    fn test_extract_palette_too_many_colors() {
        let pixels: Vec<u8> = (0..300u32)
            .flat_map(|i| [(i % 256) as u8, (i / 256) as u8, 0, 255])
            .collect();
        assert!(extract_palette_sequential(&pixels).is_none());
        assert!(extract_palette_parallel(&pixels).is_none());
    }

    #[test]
    fn test_parallel_matches_sequential_indices() {
        let size = 128;
        let dots: Vec<(usize, usize, [u8; 4])> = (0..40)
            .map(|i| (i * 3 % size, i * 7 % size, [i as u8 * 6, 20, 60, 200]))
            .collect();
        let pixels = tile_with_dots(size, &dots);

        let (seq_palette, seq_indices) = extract_palette_sequential(&pixels).unwrap();
        let (par_palette, par_indices) = extract_palette_parallel(&pixels).unwrap();
        assert_eq!(seq_palette.len(), par_palette.len());

        // Palette order may differ, the decoded colours may not
        for (s, p) in seq_indices.iter().zip(par_indices.iter()) {
            assert_eq!(seq_palette[*s as usize], par_palette[*p as usize]);
        }
    }

    #[test]
    fn test_indexed_has_trns_for_translucent_dots() {
        let pixels = tile_with_dots(8, &[(3, 3, [220, 20, 60, 102])]);
        let png = create_png_auto(&pixels, 8, 8).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        assert_eq!(png[25], 3, "color type should be indexed");
        assert!(png.windows(4).any(|w| w == b"tRNS"));
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_rgba_fallback() {
        let pixels: Vec<u8> = (0..32 * 32u32)
            .flat_map(|i| [(i % 256) as u8, (i / 256) as u8, 128, 255])
            .collect();
        let png = create_png_auto(&pixels, 32, 32).unwrap();
        assert_eq!(png[25], 6, "color type should be RGBA");
    }

    #[test]
    fn test_rejects_short_buffer() {
        assert!(create_png(&[0u8; 12], 2, 2).is_err());
        assert!(create_png_auto(&[0u8; 16], 0, 4).is_err());
        assert!(create_png_indexed(2, 2, &[(0, 0, 0, 0)], &[0, 0, 0]).is_err());
    }

    #[test]
    fn test_chunk_crc() {
        let mut out = Vec::new();
        write_chunk(&mut out, b"IEND", &[]);
        assert_eq!(out, vec![0, 0, 0, 0, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82]);
    }
}
