use opencv::{
    core::{Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

use crate::tracker::TrackingResult;

const COLORS: &[Scalar] = &[
    Scalar::new(255.0, 0.0, 0.0, 0.0),   // Red
    Scalar::new(0.0, 255.0, 0.0, 0.0),   // Green
    Scalar::new(0.0, 0.0, 255.0, 0.0),   // Blue
    Scalar::new(255.0, 255.0, 0.0, 0.0), // Yellow
    Scalar::new(255.0, 0.0, 255.0, 0.0), // Magenta
    Scalar::new(0.0, 255.0, 255.0, 0.0), // Cyan
];

/// Draw text with a black outline for visibility on busy frames.
pub fn draw_text(
    frame: &mut Mat,
    text: &str,
    x: i32,
    y: i32,
    font_scale: f64,
    color: Scalar,
) -> opencv::Result<()> {
    let text_pos = Point::new(x, y);

    imgproc::put_text(
        frame,
        text,
        text_pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        3,
        imgproc::LINE_8,
        false,
    )?;

    imgproc::put_text(
        frame,
        text,
        text_pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        color,
        1,
        imgproc::LINE_8,
        false,
    )?;

    Ok(())
}

/// Draw one result: its box, whatever metadata labels it carries stacked
/// above the box, and its segmentation overlay if one is attached. Bare
/// results come out as a plain box.
pub fn draw_result(frame: &mut Mat, result: &TrackingResult, color: Scalar) -> anyhow::Result<()> {
    if let Some(drawing) = &result.drawing {
        let mut roi = Mat::roi_mut(frame, drawing.bbox)?;
        drawing.colored_roi.copy_to_masked(&mut roi, &drawing.mask)?;
    }

    imgproc::rectangle(frame, result.bbox, color, 2, imgproc::LINE_8, 0)?;

    let mut labels: Vec<String> = Vec::new();
    match (&result.class_name, result.confidence) {
        (Some(name), Some(conf)) => labels.push(format!("{} {:.2}", name, conf)),
        (Some(name), None) => labels.push(name.clone()),
        (None, Some(conf)) => labels.push(format!("{:.2}", conf)),
        (None, None) => {}
    }
    if let Some(age) = &result.age {
        labels.push(format!("age: {}", age));
    }
    if let Some(gender) = &result.gender {
        labels.push(gender.clone());
    }
    if let Some(ethnicity) = &result.ethnicity {
        labels.push(ethnicity.clone());
    }

    // stack labels upward from the top-left corner of the box
    for (i, label) in labels.iter().enumerate() {
        let y = result.bbox.y - 5 - 18 * i as i32;
        draw_text(frame, label, result.bbox.x, y, 0.5, color)?;
    }

    Ok(())
}

/// Draw every result, colored by slot so an object keeps its color for as
/// long as it keeps its position in the output.
pub fn draw_results(frame: &mut Mat, results: &[TrackingResult]) -> anyhow::Result<()> {
    for (slot, result) in results.iter().enumerate() {
        let color = COLORS[slot % COLORS.len()];
        draw_result(frame, result, color)?;
    }
    Ok(())
}

pub fn draw_frame_info(frame: &mut Mat, frame_id: i64, fps: f64) -> opencv::Result<()> {
    let text = format!("Frame: {} FPS: {:.1}", frame_id, fps);
    let text_pos = Point::new(10, 30);
    imgproc::put_text(
        frame,
        &text,
        text_pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}
