//! Decoding of raw PaddleOCR model outputs
//!
//! Turns the DB detection probability map into text boxes and the CRNN
//! recognition logits into strings.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::cmp::Ordering;

use crate::config::DetectionSettings;

/// CTC blank symbol index in the recognition output
const CTC_BLANK: usize = 0;

/// Text region in detection model coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Mean text probability inside the region
    pub score: f32,
}

impl TextBox {
    /// Corners ordered top-left, top-right, bottom-right, bottom-left
    pub fn quad(&self) -> [(f32, f32); 4] {
        [
            (self.x1, self.y1),
            (self.x2, self.y1),
            (self.x2, self.y2),
            (self.x1, self.y2),
        ]
    }

    /// Divide coordinates by per-axis scale factors
    pub fn unscale(self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x1: self.x1 / scale_x,
            y1: self.y1 / scale_y,
            x2: self.x2 / scale_x,
            y2: self.y2 / scale_y,
            score: self.score,
        }
    }
}

#[derive(Debug, Clone)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    prob_sum: f32,
    pixels: u32,
}

impl Region {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            prob_sum: 0.0,
            pixels: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32, prob: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.prob_sum += prob;
        self.pixels += 1;
    }
}

/// Extract text boxes from a DB probability map of `width` x `height`.
///
/// Boxes are sorted top-to-bottom, then left-to-right.
pub fn boxes_from_probability_map(
    prob: &[f32],
    width: usize,
    height: usize,
    settings: &DetectionSettings,
) -> Vec<TextBox> {
    if width == 0 || height == 0 || prob.len() < width * height {
        return Vec::new();
    }

    let bitmap = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if prob[y as usize * width + x as usize] > settings.binary_threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&bitmap, Connectivity::Eight, Luma([0u8]));

    let mut regions: Vec<Option<Region>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if regions.len() < label {
            regions.resize(label, None);
        }
        regions[label - 1]
            .get_or_insert_with(|| Region::new(x, y))
            .add(x, y, prob[y as usize * width + x as usize]);
    }

    let mut boxes: Vec<TextBox> = regions
        .into_iter()
        .flatten()
        .filter_map(|region| region_to_box(&region, width as f32, height as f32, settings))
        .collect();

    sort_reading_order(&mut boxes);
    boxes
}

/// Boxes whose tops are closer than this share a text line
const LINE_TOLERANCE: f32 = 10.0;

fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| {
        a.y1.partial_cmp(&b.y1)
            .unwrap_or(Ordering::Equal)
            .then(a.x1.partial_cmp(&b.x1).unwrap_or(Ordering::Equal))
    });

    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let (upper, lower) = (boxes[j], boxes[j + 1]);
            if (lower.y1 - upper.y1).abs() < LINE_TOLERANCE && lower.x1 < upper.x1 {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}

fn region_to_box(
    region: &Region,
    max_w: f32,
    max_h: f32,
    settings: &DetectionSettings,
) -> Option<TextBox> {
    let box_w = (region.max_x - region.min_x + 1) as f32;
    let box_h = (region.max_y - region.min_y + 1) as f32;
    if box_w.min(box_h) < settings.min_box_size as f32 {
        return None;
    }

    let score = region.prob_sum / region.pixels.max(1) as f32;
    if score < settings.box_threshold {
        return None;
    }

    // DB shrinks text kernels during training; grow them back
    let offset = box_w * box_h * settings.unclip_ratio / (2.0 * (box_w + box_h));

    Some(TextBox {
        x1: (region.min_x as f32 - offset).clamp(0.0, max_w),
        y1: (region.min_y as f32 - offset).clamp(0.0, max_h),
        x2: (region.max_x as f32 + 1.0 + offset).clamp(0.0, max_w),
        y2: (region.max_y as f32 + 1.0 + offset).clamp(0.0, max_h),
        score,
    })
}

/// Load a recognition dictionary: one symbol per line, plus a trailing space
pub fn parse_charset(content: &str) -> Vec<String> {
    let mut charset: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect();
    charset.push(" ".to_string());
    charset
}

/// Greedy CTC decoding of `steps` x `classes` probabilities.
///
/// Returns the text and the mean probability of the emitted symbols.
pub fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    charset: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut score_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = CTC_BLANK;

    if classes == 0 {
        return (text, 0.0);
    }

    for step in probs.chunks_exact(classes).take(steps) {
        let (index, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((CTC_BLANK, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        if index != CTC_BLANK && index != previous {
            if let Some(symbol) = charset.get(index - 1) {
                text.push_str(symbol);
                score_sum += prob;
                emitted += 1;
            }
        }
        previous = index;
    }

    let confidence = if emitted == 0 {
        0.0
    } else {
        score_sum / emitted as f32
    };
    (text, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with_rects(width: usize, height: usize, rects: &[(usize, usize, usize, usize)]) -> Vec<f32> {
        let mut prob = vec![0.0f32; width * height];
        for &(x0, y0, x1, y1) in rects {
            for y in y0..y1 {
                for x in x0..x1 {
                    prob[y * width + x] = 0.9;
                }
            }
        }
        prob
    }

    #[test]
    fn test_empty_map_yields_no_boxes() {
        let prob = vec![0.0f32; 64 * 32];
        let boxes = boxes_from_probability_map(&prob, 64, 32, &DetectionSettings::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_single_region_is_unclipped() {
        let prob = map_with_rects(100, 50, &[(20, 10, 60, 20)]);
        let settings = DetectionSettings::default();
        let boxes = boxes_from_probability_map(&prob, 100, 50, &settings);

        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        // 40x10 region: offset = 400 * 1.5 / 100 = 6
        assert!((b.x1 - 14.0).abs() < 1e-4);
        assert!((b.y1 - 4.0).abs() < 1e-4);
        assert!((b.x2 - 66.0).abs() < 1e-4);
        assert!((b.y2 - 26.0).abs() < 1e-4);
        assert!((b.score - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_boxes_are_clamped_to_map() {
        let prob = map_with_rects(40, 20, &[(0, 0, 30, 10)]);
        let boxes = boxes_from_probability_map(&prob, 40, 20, &DetectionSettings::default());

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].x1, 0.0);
        assert_eq!(boxes[0].y1, 0.0);
        assert!(boxes[0].x2 <= 40.0);
    }

    #[test]
    fn test_small_and_weak_regions_are_dropped() {
        let mut prob = map_with_rects(100, 100, &[(10, 10, 12, 40)]);
        // Weak region: above binary threshold, below box threshold
        for y in 60..80 {
            for x in 10..80 {
                prob[y * 100 + x] = 0.4;
            }
        }
        let boxes = boxes_from_probability_map(&prob, 100, 100, &DetectionSettings::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_boxes_sorted_top_to_bottom_then_left_to_right() {
        let prob = map_with_rects(
            200,
            100,
            &[(120, 10, 180, 20), (10, 10, 60, 20), (10, 60, 60, 70)],
        );
        let boxes = boxes_from_probability_map(&prob, 200, 100, &DetectionSettings::default());

        assert_eq!(boxes.len(), 3);
        assert!(boxes[0].x1 < boxes[1].x1);
        assert!(boxes[1].y1 < boxes[2].y1);
    }

    #[test]
    fn test_quad_order_and_unscale() {
        let b = TextBox {
            x1: 10.0,
            y1: 20.0,
            x2: 30.0,
            y2: 40.0,
            score: 1.0,
        };
        assert_eq!(b.quad(), [(10.0, 20.0), (30.0, 20.0), (30.0, 40.0), (10.0, 40.0)]);

        let u = b.unscale(2.0, 0.5);
        assert_eq!((u.x1, u.y1, u.x2, u.y2), (5.0, 40.0, 15.0, 80.0));
    }

    #[test]
    fn test_parse_charset_appends_space() {
        let charset = parse_charset("a\r\nb\n\nc\n");
        assert_eq!(charset, vec!["a", "b", "c", " "]);
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let charset = parse_charset("h\ne\nl\no");
        // classes: blank, h, e, l, o, space
        let classes = 6;
        let sequence = [1, 1, 2, 0, 3, 3, 0, 3, 4, 5, 0];
        let mut probs = vec![0.0f32; sequence.len() * classes];
        for (step, &index) in sequence.iter().enumerate() {
            probs[step * classes + index] = 0.8;
        }

        let (text, confidence) = ctc_greedy_decode(&probs, sequence.len(), classes, &charset);
        assert_eq!(text, "hello ");
        assert!((confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank() {
        let charset = parse_charset("a");
        let probs = vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let (text, confidence) = ctc_greedy_decode(&probs, 2, 3, &charset);
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_ctc_decode_without_classes() {
        let charset = parse_charset("a\n");
        assert_eq!(ctc_greedy_decode(&[0.5, 0.5], 2, 0, &charset), (String::new(), 0.0));
    }
}
