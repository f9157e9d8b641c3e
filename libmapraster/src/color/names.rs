//! A representative subset of the CSS/X11 named colors, used for
//! nearest-name labeling of extracted color layers. Not the full 148-entry
//! CSS4 table, but enough common names to label map-typical hues (water
//! blues, terrain greens/browns, paper off-whites, ink blacks).

pub const NAMED_COLORS: &[(&str, u8, u8, u8)] = &[
    ("black", 0, 0, 0),
    ("white", 255, 255, 255),
    ("red", 255, 0, 0),
    ("green", 0, 128, 0),
    ("blue", 0, 0, 255),
    ("yellow", 255, 255, 0),
    ("cyan", 0, 255, 255),
    ("magenta", 255, 0, 255),
    ("gray", 128, 128, 128),
    ("silver", 192, 192, 192),
    ("maroon", 128, 0, 0),
    ("olive", 128, 128, 0),
    ("purple", 128, 0, 128),
    ("teal", 0, 128, 128),
    ("navy", 0, 0, 128),
    ("orange", 255, 165, 0),
    ("gold", 255, 215, 0),
    ("brown", 165, 42, 42),
    ("tan", 210, 180, 140),
    ("beige", 245, 245, 220),
    ("ivory", 255, 255, 240),
    ("khaki", 240, 230, 140),
    ("chocolate", 210, 105, 30),
    ("sienna", 160, 82, 45),
    ("peru", 205, 133, 63),
    ("wheat", 245, 222, 179),
    ("forestgreen", 34, 139, 34),
    ("darkgreen", 0, 100, 0),
    ("seagreen", 46, 139, 87),
    ("olivedrab", 107, 142, 35),
    ("yellowgreen", 154, 205, 50),
    ("lightgreen", 144, 238, 144),
    ("lime", 0, 255, 0),
    ("skyblue", 135, 206, 235),
    ("steelblue", 70, 130, 180),
    ("royalblue", 65, 105, 225),
    ("cornflowerblue", 100, 149, 237),
    ("powderblue", 176, 224, 230),
    ("lightblue", 173, 216, 230),
    ("deepskyblue", 0, 191, 255),
    ("turquoise", 64, 224, 208),
    ("aquamarine", 127, 255, 212),
    ("slategray", 112, 128, 144),
    ("lightgray", 211, 211, 211),
    ("dimgray", 105, 105, 105),
    ("darkgray", 169, 169, 169),
    ("crimson", 220, 20, 60),
    ("indianred", 205, 92, 92),
    ("salmon", 250, 128, 114),
    ("coral", 255, 127, 80),
    ("tomato", 255, 99, 71),
    ("firebrick", 178, 34, 34),
    ("darkred", 139, 0, 0),
    ("pink", 255, 192, 203),
    ("lavender", 230, 230, 250),
    ("plum", 221, 160, 221),
    ("orchid", 218, 112, 214),
    ("indigo", 75, 0, 130),
    ("slateblue", 106, 90, 205),
    ("chartreuse", 127, 255, 0),
    ("mintcream", 245, 255, 250),
    ("honeydew", 240, 255, 240),
    ("mistyrose", 255, 228, 225),
    ("linen", 250, 240, 230),
    ("cornsilk", 255, 248, 220),
    ("peachpuff", 255, 218, 185),
    ("antiquewhite", 250, 235, 215),
    ("papayawhip", 255, 239, 213),
];

/// Finds the nearest named color by Euclidean RGB distance.
#[must_use]
pub fn nearest_name(rgb: (u8, u8, u8)) -> &'static str {
    NAMED_COLORS
        .iter()
        .map(|(name, r, g, b)| {
            let dr = f64::from(rgb.0) - f64::from(*r);
            let dg = f64::from(rgb.1) - f64::from(*g);
            let db = f64::from(rgb.2) - f64::from(*b);
            (name, dr.mul_add(dr, dg.mul_add(dg, db * db)))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or("unknown", |(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_red_names_red() {
        assert_eq!(nearest_name((255, 0, 0)), "red");
    }

    #[test]
    fn near_white_names_white() {
        assert_eq!(nearest_name((250, 250, 250)), "white");
    }
}
