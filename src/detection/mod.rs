//! `DetectionEngine` (C4): foreground-aware multi-stage binarization plus
//! connected-components extraction (`spec.md` section 4.4).

mod stages;

use opencv::core::{Mat, Rect, CV_8UC1};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::video::{self, BackgroundSubtractorTrait};
use thiserror::Error;
use tracing::debug;

use crate::frame::{DetectedObject, Frame, PixelFormat};
use crate::settings::{DetectionSettings, PerformanceSettings};

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("opencv error: {0}")]
    Cv(#[from] opencv::Error),
}

/// The four intermediate views retained for an external visualizer (section
/// 4.4: "overwritten each frame").
#[derive(Default)]
pub struct DebugViews {
    pub fg0: Option<Mat>,
    pub edge_tri: Option<Mat>,
    pub combined: Option<Mat>,
    pub processed: Option<Mat>,
}

pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
}

/// Owns the MOG2 background model (stateful across frames) and the most
/// recent debug views. Not `Send`-shared: one instance lives on the
/// detection thread only (section 5).
pub struct DetectionEngine {
    mog2: opencv::core::Ptr<opencv::video::BackgroundSubtractorMOG2>,
    high_speed_mog2: opencv::core::Ptr<opencv::video::BackgroundSubtractorMOG2>,
    pub debug: DebugViews,
}

impl DetectionEngine {
    pub fn new(settings: &DetectionSettings) -> Result<Self, DetectionError> {
        Ok(Self {
            mog2: video::create_background_subtractor_mog2(
                settings.bg_history,
                settings.bg_var_threshold,
                settings.detect_shadows,
            )?,
            high_speed_mog2: video::create_background_subtractor_mog2(
                settings.high_speed_bg_history,
                settings.high_speed_bg_var_threshold,
                false,
            )?,
            debug: DebugViews::default(),
        })
    }

    /// Drops and recreates both background models, per `GateCounter::reset`
    /// commanding C4 to rebuild its background model (section 4.5).
    pub fn rebuild_background_model(&mut self, settings: &DetectionSettings) -> Result<(), DetectionError> {
        self.mog2 = video::create_background_subtractor_mog2(
            settings.bg_history,
            settings.bg_var_threshold,
            settings.detect_shadows,
        )?;
        self.high_speed_mog2 = video::create_background_subtractor_mog2(
            settings.high_speed_bg_history,
            settings.high_speed_bg_var_threshold,
            false,
        )?;
        Ok(())
    }

    pub fn process(
        &mut self,
        frame: &Frame,
        detection: &DetectionSettings,
        performance: &PerformanceSettings,
    ) -> Result<DetectionResult, DetectionError> {
        let full_mat = frame_to_mat(frame)?;
        let gray_full = to_gray(&full_mat, frame.format)?;

        // targetProcessingWidth: downscale before detection, rescale objects
        // back to full-frame coordinates afterward (spec.md section 6).
        let scale = if performance.target_processing_width > 0
            && (performance.target_processing_width as u32) < frame.width
        {
            performance.target_processing_width as f64 / frame.width as f64
        } else {
            1.0
        };
        let gray = if scale < 1.0 {
            let mut resized = Mat::default();
            let new_w = (frame.width as f64 * scale).round() as i32;
            let new_h = (frame.height as f64 * scale).round() as i32;
            imgproc::resize(
                &gray_full,
                &mut resized,
                opencv::core::Size::new(new_w, new_h),
                0.0,
                0.0,
                imgproc::INTER_AREA,
            )?;
            resized
        } else {
            gray_full
        };

        let (roi_gray, roi_x_offset, roi_y_offset) = apply_roi(&gray, detection, scale)?;

        let objects = if detection.ultra_high_speed_mode {
            self.run_ultra_high_speed(&roi_gray, detection, roi_x_offset, roi_y_offset, scale)?
        } else {
            self.run_standard(&roi_gray, detection, roi_x_offset, roi_y_offset, scale)?
        };

        Ok(DetectionResult { objects })
    }

    fn run_standard(
        &mut self,
        roi_gray: &Mat,
        d: &DetectionSettings,
        roi_x_offset: i32,
        roi_y_offset: i32,
        scale: f64,
    ) -> Result<Vec<DetectedObject>, DetectionError> {
        let mut fg0 = Mat::default();
        self.mog2
            .apply(roi_gray, &mut fg0, d.bg_learning_rate)?;

        let fg1 = stages::median_blur(&fg0, 5)?;
        let fg2 = stages::opening(&fg1, 5, 1)?;
        let fg3 = stages::closing(&fg2, 7, 1)?;
        let fg_clean = stages::opening(&fg3, 3, 1)?;

        let edge_tri = stages::canny_masked(roi_gray, &fg_clean, d.canny_low_threshold, d.canny_high_threshold)?;
        let adapt_tri = stages::adaptive_threshold_masked(roi_gray, &fg_clean)?;
        let combined = stages::union3(&fg_clean, &edge_tri, &adapt_tri)?;

        let opened = stages::opening(&combined, d.opening_kernel_size, d.opening_iterations)?;
        let dilated = stages::dilate(&opened, d.dilate_kernel_size, d.dilate_iterations)?;
        // `closeKernelSize` has no dedicated iteration count in the option
        // table (section 6); it shares `morphIterations` with the stage's
        // other generic knob.
        let mut processed = stages::closing(&dilated, d.close_kernel_size, d.morph_iterations)?;

        // Small-part enhancement: 2x2 dilation before labeling (standard
        // profile only, section 4.4).
        processed = stages::dilate(&processed, 2, 1)?;

        debug!("standard detection profile: {} stages applied", 9);

        self.debug.fg0 = Some(fg0);
        self.debug.edge_tri = Some(edge_tri);
        self.debug.combined = Some(combined);
        self.debug.processed = Some(processed.try_clone()?);

        connected_components_filter(&processed, d, roi_x_offset, roi_y_offset, scale)
    }

    fn run_ultra_high_speed(
        &mut self,
        roi_gray: &Mat,
        d: &DetectionSettings,
        roi_x_offset: i32,
        roi_y_offset: i32,
        scale: f64,
    ) -> Result<Vec<DetectedObject>, DetectionError> {
        let mut fg0 = Mat::default();
        self.high_speed_mog2
            .apply(roi_gray, &mut fg0, d.bg_learning_rate)?;
        let opened = stages::opening(&fg0, 3, 1)?;
        let processed = stages::dilate(&opened, 3, 1)?;

        self.debug.fg0 = Some(fg0);
        self.debug.processed = Some(processed.try_clone()?);

        connected_components_filter(
            &processed,
            &DetectionSettings {
                min_area: d.high_speed_min_area,
                max_area: d.high_speed_max_area,
                ..*d
            },
            roi_x_offset,
            roi_y_offset,
            scale,
        )
    }
}

/// Crops to the configured ROI, scaling the ROI geometry by the same factor
/// `targetProcessingWidth` downscaling already applied to `gray` so the two
/// coordinate systems stay consistent (section 4.4/6). Returns the crop plus
/// the full-frame offsets needed to translate detections back afterward.
fn apply_roi(gray: &Mat, d: &DetectionSettings, scale: f64) -> Result<(Mat, i32, i32), DetectionError> {
    if !d.roi_enabled {
        return Ok((gray.try_clone()?, 0, 0));
    }
    let full_width = gray.cols();
    let scaled_x = (d.roi_x as f64 * scale).round() as i32;
    let scaled_y = (d.roi_y as f64 * scale).round() as i32;
    let scaled_height = (d.roi_height as f64 * scale).round() as i32;
    let scaled_width = if d.roi_width == 0 {
        full_width - scaled_x
    } else {
        (d.roi_width as f64 * scale).round() as i32
    };
    let rect = Rect::new(scaled_x, scaled_y, scaled_width, scaled_height);
    let cropped = Mat::roi(gray, rect)?;
    // Offsets are reported in full-frame (unscaled) pixel units: the caller
    // rescales ROI-local coordinates by `1/scale` first, then adds these
    // back, which only lands on full-frame coordinates if the offset itself
    // is already full-frame (section 4.4: "always in full-frame coordinates").
    Ok((cropped.try_clone()?, d.roi_x, d.roi_y))
}

fn frame_to_mat(frame: &Frame) -> Result<Mat, DetectionError> {
    let typ = match frame.format {
        PixelFormat::Mono8 => CV_8UC1,
        PixelFormat::Bgr8 => opencv::core::CV_8UC3,
    };
    // SAFETY: `frame.data` is exactly `width * height * channels` bytes and
    // outlives the `Mat` created here (we immediately clone the data into
    // OpenCV's own buffer with `try_clone` below).
    let borrowed = unsafe {
        Mat::new_rows_cols_with_data(
            frame.height as i32,
            frame.width as i32,
            typ,
            frame.data.as_ptr() as *mut _,
            opencv::core::Mat_AUTO_STEP,
        )?
    };
    borrowed.try_clone().map_err(DetectionError::from)
}

fn to_gray(mat: &Mat, format: PixelFormat) -> Result<Mat, DetectionError> {
    match format {
        PixelFormat::Mono8 => Ok(mat.try_clone()?),
        PixelFormat::Bgr8 => {
            let mut gray = Mat::default();
            imgproc::cvt_color(mat, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
            Ok(gray)
        }
    }
}

fn connected_components_filter(
    binary: &Mat,
    d: &DetectionSettings,
    roi_x_offset: i32,
    roi_y_offset: i32,
    scale: f64,
) -> Result<Vec<DetectedObject>, DetectionError> {
    let mut labels = Mat::default();
    let mut stats = Mat::default();
    let mut centroids = Mat::default();
    let n = imgproc::connected_components_with_stats(
        binary,
        &mut labels,
        &mut stats,
        &mut centroids,
        8,
        opencv::core::CV_32S,
        imgproc::CCL_DEFAULT,
    )?;

    let inverse_scale = if scale > 0.0 { 1.0 / scale } else { 1.0 };
    let mut objects = Vec::new();
    for label in 1..n {
        let area = *stats.at_2d::<i32>(label, imgproc::CC_STAT_AREA)? as f64;
        if area < d.min_area || area > d.max_area {
            continue;
        }
        let x = *stats.at_2d::<i32>(label, imgproc::CC_STAT_LEFT)?;
        let y = *stats.at_2d::<i32>(label, imgproc::CC_STAT_TOP)?;
        let w = *stats.at_2d::<i32>(label, imgproc::CC_STAT_WIDTH)?;
        let h = *stats.at_2d::<i32>(label, imgproc::CC_STAT_HEIGHT)?;

        let (wf, hf) = (w.max(1) as f64, h.max(1) as f64);
        let aspect_ratio = wf.min(hf) / wf.max(hf);
        if aspect_ratio < d.min_aspect_ratio || aspect_ratio > d.max_aspect_ratio {
            continue;
        }
        let extent = area / (wf * hf);
        if extent < d.min_extent {
            continue;
        }

        let cx = *centroids.at_2d::<f64>(label, 0)?;
        let cy = *centroids.at_2d::<f64>(label, 1)?;

        objects.push(DetectedObject {
            x: (x as f64 * inverse_scale).round() as i32 + roi_x_offset,
            y: (y as f64 * inverse_scale).round() as i32 + roi_y_offset,
            w: (w as f64 * inverse_scale).round() as i32,
            h: (h as f64 * inverse_scale).round() as i32,
            centroid_x: cx * inverse_scale + roi_x_offset as f64,
            centroid_y: cy * inverse_scale + roi_y_offset as f64,
            area: area * inverse_scale * inverse_scale,
        });
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_and_extent_formulas_match_spec_definitions() {
        // w=10,h=5 -> aspectRatio = min/max = 0.5; extent = area/(w*h)
        let area = 40.0;
        let (w, h) = (10.0_f64, 5.0_f64);
        let aspect_ratio = w.min(h) / w.max(h);
        let extent = area / (w * h);
        assert!((aspect_ratio - 0.5).abs() < 1e-9);
        assert!((extent - 0.8).abs() < 1e-9);
    }
}
