//! End-to-end rasterization tests: project points, draw them, encode PNG and
//! decode the result with the `image` crate.

use image::GenericImageView;
use projection::WebMercator;
use renderer::png::{create_png, create_png_auto};
use renderer::{rasterize, PointStyle, Rgba};
use test_utils::{cluster_points, munich_corner_points, places, MUNICH_TILE_Z10};

fn decode(png: &[u8]) -> image::DynamicImage {
    image::load_from_memory_with_format(png, image::ImageFormat::Png).expect("valid PNG")
}

fn project_all(points: &[tile_common::Point]) -> Vec<(f64, f64)> {
    let proj = WebMercator::default();
    points
        .iter()
        .map(|p| proj.pixel_in_tile(&MUNICH_TILE_Z10, p.lat, p.lon).unwrap())
        .collect()
}

#[test]
fn test_empty_tile_is_fully_transparent() {
    let canvas = rasterize(&[], 256, &PointStyle::default());
    let img = decode(&canvas.to_png().unwrap());

    assert_eq!(img.dimensions(), (256, 256));
    assert!(img.to_rgba8().pixels().all(|p| p[3] == 0));
}

#[test]
fn test_munich_cluster_renders_into_tile() {
    let points = cluster_points(places::MUNICH, 200, 0.05);
    let positions = project_all(&points);
    let canvas = rasterize(&positions, 256, &PointStyle::default());
    let img = decode(&canvas.to_png().unwrap()).to_rgba8();

    let painted = img.pixels().filter(|p| p[3] > 0).count();
    assert!(painted > 0, "cluster should paint pixels");
    assert!(painted < 256 * 256, "cluster should not cover the whole tile");
}

#[test]
fn test_decoded_pixels_match_canvas() {
    let style = PointStyle::new(3.0, Rgba::new(0, 120, 255, 180));
    let canvas = rasterize(&[(10.0, 10.0), (12.0, 11.0), (200.5, 64.5)], 256, &style);
    let img = decode(&canvas.to_png().unwrap()).to_rgba8();

    for (x, y, px) in img.enumerate_pixels() {
        let expected = canvas.pixel(x as usize, y as usize).unwrap();
        assert_eq!(px.0, [expected.r, expected.g, expected.b, expected.a]);
    }
}

#[test]
fn test_neighbour_points_paint_tile_corners() {
    let positions = project_all(&munich_corner_points());
    let style = PointStyle::new(3.0, Rgba::new(0, 0, 0, 255));
    let canvas = rasterize(&positions, 256, &style);

    for (x, y) in [(0, 0), (255, 0), (0, 255), (255, 255)] {
        assert_eq!(
            canvas.pixel(x, y).map(|c| c.a),
            Some(255),
            "corner ({}, {}) should be painted by a neighbouring point",
            x,
            y
        );
    }
    // Centre untouched
    assert_eq!(canvas.pixel(128, 128), Some(Rgba::TRANSPARENT));
}

#[test]
fn test_indexed_and_rgba_decode_identically() {
    let positions = project_all(&cluster_points(places::MUNICH, 50, 0.02));
    let canvas = rasterize(&positions, 256, &PointStyle::default());

    let indexed = decode(&create_png_auto(canvas.pixels(), 256, 256).unwrap()).to_rgba8();
    let rgba = decode(&create_png(canvas.pixels(), 256, 256).unwrap()).to_rgba8();
    assert_eq!(indexed.as_raw(), rgba.as_raw());
}

#[test]
fn test_indexed_smaller_than_rgba_for_sparse_tile() {
    let positions = project_all(&cluster_points(places::MUNICH, 30, 0.02));
    let canvas = rasterize(&positions, 256, &PointStyle::default());

    let indexed = create_png_auto(canvas.pixels(), 256, 256).unwrap();
    let rgba = create_png(canvas.pixels(), 256, 256).unwrap();
    assert!(indexed.len() <= rgba.len());
}
