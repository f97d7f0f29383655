//! Shared SVG string helpers for the diagnostic drawings.

use crate::rng::StreamRng;

pub fn header(width: f64, height: f64) -> String {
    format!(
        "<?xml version=\"1.0\" standalone=\"no\"?>\n\
         <svg xmlns=\"http://www.w3.org/2000/svg\" \
         width=\"{width:.0}\" height=\"{height:.0}\">\n"
    )
}

pub fn footer() -> &'static str {
    "</svg>\n"
}

/// Truncated coordinate pair for polyline points.
pub fn coords(x: f64, y: f64) -> String {
    format!("{x:.2},{y:.2}")
}

/// Tick marks along the bottom edge. `maxx` is the value of the
/// right edge in x-axis units, `span` the distance between ticks.
pub fn tickmarks(width: f64, height: f64, maxx: f64, span: f64) -> String {
    let mut out = String::new();
    if maxx <= 0.0 || span <= 0.0 {
        return out;
    }
    let mut x = 0.0;
    while x <= maxx {
        let px = width * (x / maxx);
        out.push_str(&format!(
            "  <line x1=\"{px:.1}\" y1=\"{:.1}\" x2=\"{px:.1}\" y2=\"{:.1}\" \
             stroke=\"#999\" stroke-width=\"1\" />\n",
            height - 12.0,
            height,
        ));
        out.push_str(&format!(
            "  <text x=\"{px:.1}\" y=\"{:.1}\" font-size=\"10\" \
             fill=\"#666\">{x:.0}</text>\n",
            height - 14.0,
        ));
        x += span;
    }
    out
}

/// A plot color readable on a white background: at least one channel
/// held at half intensity.
pub fn random_color(rng: &mut StreamRng) -> String {
    let mut channels = [0x7Fu8, 0xFF, 0xFF];
    for _ in 0..30 {
        if rng.next_byte() & 1 != 0 {
            channels.rotate_left(1);
        }
    }
    format!(
        "#{:02x}{:02x}{:02x}",
        channels[0] & rng.next_byte(),
        channels[1] & rng.next_byte(),
        channels[2] & rng.next_byte(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_brackets_are_well_formed() {
        let doc = format!("{}{}", header(100.0, 50.0), footer());
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<svg"));
        assert!(doc.ends_with("</svg>\n"));
    }

    #[test]
    fn colors_are_hex_triples() {
        let mut rng = StreamRng::from_phrase("make colors");
        for _ in 0..10 {
            let color = random_color(&mut rng);
            assert_eq!(color.len(), 7);
            assert!(color.starts_with('#'));
        }
    }
}
