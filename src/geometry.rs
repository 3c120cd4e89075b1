//! 门线几何计算 (Gate geometry)
//!
//! 所有函数均为纯函数: 叉积判边、点到线段距离、单位法向量。

use serde::{Deserialize, Serialize};

/// 像素坐标点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn dot(self, other: Point) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(self, other: Point) -> f32 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Point) -> f32 {
        self.sub(other).length()
    }
}

/// 点相对于有向线段 A→B 的位置
///
/// 返回 cross(B−A, P−A) 的符号: +1 左侧, -1 右侧, 0 线上
pub fn side(a: Point, b: Point, p: Point) -> i8 {
    let s = b.sub(a).cross(p.sub(a));
    if s > 0.0 {
        1
    } else if s < 0.0 {
        -1
    } else {
        0
    }
}

/// 点 P 到线段 AB 的最短距离 (投影参数截断到 [0, 1])
pub fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let v = b.sub(a);
    let len2 = v.dot(v);
    if len2 == 0.0 {
        return p.distance(a);
    }
    let t = (p.sub(a).dot(v) / len2).clamp(0.0, 1.0);
    let closest = Point::new(a.x + t * v.x, a.y + t * v.y);
    p.distance(closest)
}

/// A→B 的单位左法向量 (用于计算跨线方向上的位移)
pub fn unit_normal(a: Point, b: Point) -> Point {
    let v = b.sub(a);
    let len = match v.length() {
        l if l > 0.0 => l,
        _ => 1.0,
    };
    Point::new(-v.y / len, v.x / len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Point = Point::new(50.0, 50.0);
    const B: Point = Point::new(150.0, 50.0);

    #[test]
    fn side_classifies_both_half_planes_and_the_line() {
        assert!(side(A, B, Point::new(100.0, 60.0)) > 0);
        assert!(side(A, B, Point::new(100.0, 40.0)) < 0);
        assert_eq!(side(A, B, Point::new(100.0, 50.0)), 0);
        // 延长线上同样视为线上
        assert_eq!(side(A, B, Point::new(400.0, 50.0)), 0);
        assert_eq!(side(A, B, Point::new(-20.0, 50.0)), 0);
    }

    #[test]
    fn side_flips_when_segment_is_reversed() {
        let p = Point::new(10.0, 90.0);
        assert_eq!(side(A, B, p), -side(B, A, p));
    }

    #[test]
    fn distance_is_zero_at_endpoints() {
        assert_eq!(distance_to_segment(A, A, B), 0.0);
        assert_eq!(distance_to_segment(B, A, B), 0.0);
    }

    #[test]
    fn distance_beyond_endpoint_uses_endpoint() {
        let p = Point::new(180.0, 50.0);
        assert!((distance_to_segment(p, A, B) - 30.0).abs() < 1e-5);

        let q = Point::new(153.0, 54.0);
        assert!((distance_to_segment(q, A, B) - q.distance(B)).abs() < 1e-5);
    }

    #[test]
    fn distance_inside_segment_is_perpendicular() {
        let p = Point::new(90.0, 72.0);
        assert!((distance_to_segment(p, A, B) - 22.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_segment_falls_back_to_point_distance() {
        let p = Point::new(53.0, 54.0);
        assert!((distance_to_segment(p, A, A) - 5.0).abs() < 1e-5);
        assert_eq!(unit_normal(A, A), Point::new(0.0, 0.0));
    }

    #[test]
    fn unit_normal_is_perpendicular_and_normalized() {
        let a = Point::new(10.0, 20.0);
        let b = Point::new(70.0, 100.0);
        let n = unit_normal(a, b);
        assert!((n.length() - 1.0).abs() < 1e-6);
        assert!(n.dot(b.sub(a)).abs() < 1e-4);
        // 法向量指向叉积为正的一侧
        let probe = Point::new(a.x + n.x * 5.0, a.y + n.y * 5.0);
        assert_eq!(side(a, b, probe), 1);
    }
}
