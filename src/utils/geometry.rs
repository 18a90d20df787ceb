use std::fmt;

/// A point as defined by its x and y coordinates, in the X11 root coordinate space
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    /// horizontal coordinate
    pub x: i32,
    /// vertical coordinate
    pub y: i32,
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Point")
            .field("x", &self.x)
            .field("y", &self.y)
            .finish()
    }
}

impl From<(i32, i32)> for Point {
    #[inline]
    fn from((x, y): (i32, i32)) -> Point {
        Point { x, y }
    }
}

/// A size as defined by its width and height
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Size {
    /// horizontal coordinate
    pub w: i32,
    /// vertical coordinate
    pub h: i32,
}

impl Size {
    /// Whether both dimensions are at least the ones of `other`
    #[inline]
    pub fn covers(self, other: Size) -> bool {
        self.w >= other.w && self.h >= other.h
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Size")
            .field("w", &self.w)
            .field("h", &self.h)
            .finish()
    }
}

impl From<(i32, i32)> for Size {
    #[inline]
    fn from((w, h): (i32, i32)) -> Size {
        Size { w, h }
    }
}

/// A rectangle defined by its top-left corner and dimensions
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// Location of the top-left corner of the rectangle
    pub loc: Point,
    /// Size of the rectangle, as (width, height)
    pub size: Size,
}

impl Rectangle {
    /// Create a new [`Rectangle`] from the coordinates of its top-left corner and its dimensions
    #[inline]
    pub fn from_loc_and_size(loc: impl Into<Point>, size: impl Into<Size>) -> Self {
        Rectangle {
            loc: loc.into(),
            size: size.into(),
        }
    }

    /// Checks whether given [`Point`] is inside the rectangle
    #[inline]
    pub fn contains<P: Into<Point>>(self, point: P) -> bool {
        let p: Point = point.into();
        (p.x >= self.loc.x)
            && (p.x < self.loc.x.saturating_add(self.size.w))
            && (p.y >= self.loc.y)
            && (p.y < self.loc.y.saturating_add(self.size.h))
    }
}

impl fmt::Debug for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rectangle")
            .field("x", &self.loc.x)
            .field("y", &self.loc.y)
            .field("width", &self.size.w)
            .field("height", &self.size.h)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Point, Rectangle, Size};

    #[test]
    fn rectangle_contains_is_exclusive_on_far_edges() {
        let rect = Rectangle::from_loc_and_size((10, 10), (20, 5));
        assert!(rect.contains((10, 10)));
        assert!(rect.contains((29, 14)));
        assert!(!rect.contains((30, 10)));
        assert!(!rect.contains(Point { x: 10, y: 15 }));
    }

    #[test]
    fn size_covers() {
        assert!(Size::from((5, 5)).covers((5, 4).into()));
        assert!(!Size::from((5, 5)).covers((6, 1).into()));
    }
}
