use gaea_scene::Position;

/// A screen rectangle in viewport coordinates, origin at the lower left.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        return x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height;
    }

    /// The intersection with `that`, or `None` when the rectangles are
    /// disjoint.
    pub fn intersection(&self, that: &Rectangle) -> Option<Rectangle> {
        let min_x = self.x.max(that.x);
        let min_y = self.y.max(that.y);
        let max_x = (self.x + self.width).min(that.x + that.width);
        let max_y = (self.y + self.height).min(that.y + that.height);
        if max_x <= min_x || max_y <= min_y {
            return None;
        }
        return Some(Rectangle::new(min_x, min_y, max_x - min_x, max_y - min_y));
    }
}

/// An RGBA color used to identify one pickable object per frame. The RGB
/// channels form a 24-bit counter; alpha is always opaque.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PickColor(pub [u8; 4]);

impl PickColor {
    pub const TRANSPARENT: PickColor = PickColor([0, 0, 0, 0]);

    pub fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        PickColor([red, green, blue, alpha])
    }

    /// The next color in the 24-bit sequence, wrapping to 1 past the
    /// sequence end so that zero (the cleared framebuffer) is never issued.
    pub fn next(&self) -> PickColor {
        let [r, g, b, _] = self.0;
        let code = ((r as u32) << 16 | (g as u32) << 8 | b as u32).wrapping_add(1) & 0x00ff_ffff;
        let code = if code == 0 { 1 } else { code };
        return PickColor([(code >> 16) as u8, (code >> 8) as u8, code as u8, 255]);
    }

    /// Whether the RGB channels match, ignoring alpha. Pick resolution reads
    /// colors back from a framebuffer whose alpha is not meaningful.
    pub fn equals_rgb(&self, that: &PickColor) -> bool {
        return self.0[0] == that.0[0] && self.0[1] == that.0[1] && self.0[2] == that.0[2];
    }
}

/// Reads back the pick color drawn at a screen point. Implemented by render
/// backends over their pick framebuffer.
pub trait PickColorReader {
    fn read_pick_color(&self, x: f64, y: f64) -> Option<PickColor>;

    /// All distinct colors present in a rectangle of the pick framebuffer.
    fn read_pick_colors(&self, rectangle: &Rectangle) -> Vec<PickColor> {
        let mut colors = Vec::new();
        let (x0, y0) = (rectangle.x.floor() as i64, rectangle.y.floor() as i64);
        let (x1, y1) = (
            (rectangle.x + rectangle.width).ceil() as i64,
            (rectangle.y + rectangle.height).ceil() as i64,
        );
        for y in y0..y1 {
            for x in x0..x1 {
                if let Some(color) = self.read_pick_color(x as f64, y as f64) {
                    if !colors.contains(&color) {
                        colors.push(color);
                    }
                }
            }
        }
        return colors;
    }
}

/// One object resolved by a pick operation.
#[derive(Clone, Debug)]
pub struct PickedObject {
    pub color: Option<PickColor>,
    /// A name identifying the picked object to the application.
    pub user_object: String,
    pub position: Option<Position>,
    pub is_terrain: bool,
    /// True when this object was the nearest to the eye at the pick point.
    pub is_on_top: bool,
}

impl PickedObject {
    pub fn new(color: PickColor, user_object: impl Into<String>) -> Self {
        Self {
            color: Some(color),
            user_object: user_object.into(),
            position: None,
            is_terrain: false,
            is_on_top: false,
        }
    }

    pub fn terrain(
        color: Option<PickColor>,
        user_object: impl Into<String>,
        position: Position,
    ) -> Self {
        Self {
            color,
            user_object: user_object.into(),
            position: Some(position),
            is_terrain: true,
            is_on_top: false,
        }
    }
}

/// The objects resolved by one pick operation.
#[derive(Clone, Debug, Default)]
pub struct PickedObjectList {
    objects: Vec<PickedObject>,
}

impl PickedObjectList {
    pub fn add(&mut self, object: PickedObject) {
        self.objects.push(object);
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        return self.objects.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.objects.is_empty();
    }

    pub fn objects(&self) -> &[PickedObject] {
        return &self.objects;
    }

    pub fn objects_mut(&mut self) -> &mut Vec<PickedObject> {
        return &mut self.objects;
    }

    pub fn top_picked_object(&self) -> Option<&PickedObject> {
        return self.objects.iter().find(|po| po.is_on_top);
    }

    pub fn terrain_object(&self) -> Option<&PickedObject> {
        return self.objects.iter().find(|po| po.is_terrain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_color_counts_through_the_rgb_channels() {
        let first = PickColor::TRANSPARENT.next();
        assert_eq!(first, PickColor([0, 0, 1, 255]));

        let carry = PickColor([0, 0, 255, 255]).next();
        assert_eq!(carry, PickColor([0, 1, 0, 255]));

        // The sequence never returns to all-zero RGB.
        let wrapped = PickColor([255, 255, 255, 255]).next();
        assert_eq!(wrapped, PickColor([0, 0, 1, 255]));
    }

    #[test]
    fn rgb_equality_ignores_alpha() {
        let a = PickColor([9, 8, 7, 255]);
        let b = PickColor([9, 8, 7, 0]);
        assert!(a.equals_rgb(&b));
        assert!(!a.equals_rgb(&PickColor([9, 8, 6, 255])));
    }

    #[test]
    fn rectangle_intersection_clamps_to_overlap() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let b = Rectangle::new(5.0, 5.0, 10.0, 10.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Rectangle::new(5.0, 5.0, 5.0, 5.0));
        assert!(a.intersection(&Rectangle::new(20.0, 20.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn list_tracks_top_and_terrain_objects() {
        let mut list = PickedObjectList::default();
        list.add(PickedObject::new(PickColor([0, 0, 1, 255]), "shape"));
        let mut terrain =
            PickedObject::terrain(None, "terrain", Position::new(10.0, 20.0, 0.0));
        terrain.is_on_top = true;
        list.add(terrain);

        assert_eq!(list.len(), 2);
        assert_eq!(list.top_picked_object().unwrap().user_object, "terrain");
        assert!(list.terrain_object().unwrap().is_terrain);
    }
}
