//! Draw detection boxes onto an image in each detection's display color.

use cardsight_core::Detection;
use image::RgbaImage;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const BOX_THICKNESS: i32 = 3;

/// Outline every detection on `image`. Boxes are clipped to the image.
pub fn draw_detections(image: &mut RgbaImage, detections: &[Detection]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
        return;
    }

    for det in detections {
        let b = det.bounding_box;
        let x_min = (b.x.floor() as i32).clamp(0, w - 1);
        let y_min = (b.y.floor() as i32).clamp(0, h - 1);
        let x_max = (b.right().ceil() as i32).clamp(0, w - 1);
        let y_max = (b.bottom().ceil() as i32).clamp(0, h - 1);
        if x_min >= x_max || y_min >= y_max {
            continue;
        }

        let color: image::Rgba<u8> = det.display_color.into();
        for t in 0..BOX_THICKNESS {
            let width = x_max - x_min - 2 * t;
            let height = y_max - y_min - 2 * t;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}
