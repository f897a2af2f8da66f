use opencv::core::Rect;

/// Perform non-max suppression on boxes & scores, return indices to keep.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], iou_thresh: f32) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_unstable_by(|&i, &j| scores[j].partial_cmp(&scores[i]).unwrap());
    let mut keep = Vec::new();
    while let Some(&i) = idxs.first() {
        keep.push(i);
        idxs = idxs
            .into_iter()
            .skip(1)
            .filter(|&j| compute_iou(&boxes[i], &boxes[j]) < iou_thresh)
            .collect();
    }
    keep
}

/// Compute IoU between two bounding boxes in [x, y, w, h] format.
pub fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let a_x2 = a[0] + a[2];
    let a_y2 = a[1] + a[3];
    let b_x2 = b[0] + b[2];
    let b_y2 = b[1] + b[3];

    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a_x2.min(b_x2);
    let y2 = a_y2.min(b_y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let a_area = a[2] * a[3];
    let b_area = b[2] * b[3];

    if a_area + b_area - inter_area <= 0.0 {
        return 0.0;
    }

    inter_area / (a_area + b_area - inter_area)
}

/// Convert a [x, y, w, h] float box to an integer pixel Rect, clamped to
/// the given frame dimensions.
pub fn box_to_rect(tlwh: &[f32; 4], frame_width: i32, frame_height: i32) -> Rect {
    let x = (tlwh[0].max(0.0) as i32).min(frame_width - 1);
    let y = (tlwh[1].max(0.0) as i32).min(frame_height - 1);
    let w = (tlwh[2] as i32).min(frame_width - x).max(1);
    let h = (tlwh[3] as i32).min(frame_height - y).max(1);
    Rect::new(x, y, w, h)
}

pub fn rect_to_box(rect: &Rect) -> [f32; 4] {
    [
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    ]
}
