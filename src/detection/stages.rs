//! Low-level OpenCV stage helpers used by [`super::DetectionEngine`]. Kept
//! separate from the engine so each stage's identity-skip rule (section 4.4:
//! "any kernel-size parameter equal to 1 means skip that step") is visible
//! in one place per stage.

use opencv::core::{self, Mat, Point, Size, BORDER_CONSTANT};
use opencv::imgproc::{self, MorphShapes, MorphTypes, THRESH_BINARY};
use opencv::prelude::*;
use opencv::Result as CvResult;

pub fn elliptical_kernel(size: i32) -> CvResult<Mat> {
    imgproc::get_structuring_element(
        MorphShapes::MORPH_ELLIPSE as i32,
        Size::new(size, size),
        Point::new(-1, -1),
    )
}

/// Morphological opening; a no-op copy when `size <= 1` or `iterations == 0`
/// (section 4.4 identity rule).
pub fn opening(src: &Mat, size: i32, iterations: i32) -> CvResult<Mat> {
    if size <= 1 || iterations <= 0 {
        return src.try_clone();
    }
    let kernel = elliptical_kernel(size)?;
    let mut dst = Mat::default();
    imgproc::morphology_ex(
        src,
        &mut dst,
        MorphTypes::MORPH_OPEN as i32,
        &kernel,
        Point::new(-1, -1),
        iterations,
        BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(dst)
}

pub fn closing(src: &Mat, size: i32, iterations: i32) -> CvResult<Mat> {
    if size <= 1 || iterations <= 0 {
        return src.try_clone();
    }
    let kernel = elliptical_kernel(size)?;
    let mut dst = Mat::default();
    imgproc::morphology_ex(
        src,
        &mut dst,
        MorphTypes::MORPH_CLOSE as i32,
        &kernel,
        Point::new(-1, -1),
        iterations,
        BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(dst)
}

pub fn dilate(src: &Mat, size: i32, iterations: i32) -> CvResult<Mat> {
    if size <= 1 || iterations <= 0 {
        return src.try_clone();
    }
    let kernel = elliptical_kernel(size)?;
    let mut dst = Mat::default();
    imgproc::dilate(
        src,
        &mut dst,
        &kernel,
        Point::new(-1, -1),
        iterations,
        BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(dst)
}

pub fn median_blur(src: &Mat, k: i32) -> CvResult<Mat> {
    if k <= 1 {
        return src.try_clone();
    }
    let mut dst = Mat::default();
    imgproc::median_blur(src, &mut dst, k)?;
    Ok(dst)
}

/// Canny on a lightly-blurred grayscale copy, masked by `fg_clean`, then
/// thresholded to a strict binary map (section 4.4 stage 6). The exposed
/// thresholds describe the "strong" tier; the edge detector itself always
/// runs at half those values.
pub fn canny_masked(gray: &Mat, fg_clean: &Mat, canny_low: i32, canny_high: i32) -> CvResult<Mat> {
    let mut blurred = Mat::default();
    imgproc::gaussian_blur(
        gray,
        &mut blurred,
        Size::new(3, 3),
        0.0,
        0.0,
        BORDER_CONSTANT,
    )?;
    let mut edges = Mat::default();
    imgproc::canny(&blurred, &mut edges, (canny_low / 2) as f64, (canny_high / 2) as f64, 3, false)?;
    let mut masked = Mat::default();
    core::bitwise_and(&edges, fg_clean, &mut masked, &core::no_array())?;
    let mut edge_tri = Mat::default();
    imgproc::threshold(&masked, &mut edge_tri, 0.0, 255.0, THRESH_BINARY)?;
    Ok(edge_tri)
}

/// Gaussian-weighted adaptive threshold on the grayscale ROI, masked by
/// `fg_clean`, then thresholded at 127 (section 4.4 stage 7).
pub fn adaptive_threshold_masked(gray: &Mat, fg_clean: &Mat) -> CvResult<Mat> {
    let mut adaptive = Mat::default();
    imgproc::adaptive_threshold(
        gray,
        &mut adaptive,
        255.0,
        imgproc::ADAPTIVE_THRESH_GAUSSIAN_C,
        THRESH_BINARY,
        11,
        2.0,
    )?;
    let mut masked = Mat::default();
    core::bitwise_and(&adaptive, fg_clean, &mut masked, &core::no_array())?;
    let mut adapt_tri = Mat::default();
    imgproc::threshold(&masked, &mut adapt_tri, 127.0, 255.0, THRESH_BINARY)?;
    Ok(adapt_tri)
}

pub fn union3(a: &Mat, b: &Mat, c: &Mat) -> CvResult<Mat> {
    let mut ab = Mat::default();
    core::bitwise_or(a, b, &mut ab, &core::no_array())?;
    let mut combined = Mat::default();
    core::bitwise_or(&ab, c, &mut combined, &core::no_array())?;
    Ok(combined)
}
