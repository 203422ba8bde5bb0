//! Physics-body collaborator interface
//!
//! The solver itself lives outside this crate. Obstacles only create bodies,
//! push rescaled shapes into them and destroy them, through [`PhysicsWorld`].
//! [`BodyRegistry`] is the in-process implementation used by the simulation
//! binary and the tests: it stores shapes and enforces single destruction.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::game::hitbox::Hitbox;
use crate::util::vec2::Vec2;

/// Opaque handle to a body owned by the physics world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(u32);

/// Collision shape of a body, relative to the body's local origin
#[derive(Debug, Clone, PartialEq)]
pub enum BodyShape {
    Circle { radius: f32, offset: Vec2 },
    Polygon { vertices: SmallVec<[Vec2; 4]> },
}

impl BodyShape {
    /// Shape matching a world-space hitbox, with the body origin at `origin`
    pub fn from_hitbox(hitbox: &Hitbox, origin: Vec2) -> Self {
        match *hitbox {
            Hitbox::Circle { center, radius } => BodyShape::Circle {
                radius,
                offset: center - origin,
            },
            Hitbox::Rectangle { min, max } => BodyShape::Polygon {
                vertices: SmallVec::from_buf([
                    Vec2::new(min.x, min.y) - origin,
                    Vec2::new(max.x, min.y) - origin,
                    Vec2::new(max.x, max.y) - origin,
                    Vec2::new(min.x, max.y) - origin,
                ]),
            },
        }
    }

    /// Uniformly scale about the local origin
    pub fn scaled(&self, factor: f32) -> Self {
        match self {
            BodyShape::Circle { radius, offset } => BodyShape::Circle {
                radius: radius * factor,
                offset: *offset * factor,
            },
            BodyShape::Polygon { vertices } => BodyShape::Polygon {
                vertices: vertices.iter().map(|v| *v * factor).collect(),
            },
        }
    }

    /// Largest distance from the origin to the shape boundary
    pub fn extent(&self) -> f32 {
        match self {
            BodyShape::Circle { radius, offset } => offset.length() + radius,
            BodyShape::Polygon { vertices } => vertices
                .iter()
                .map(|v| v.length())
                .fold(0.0, f32::max),
        }
    }

    pub fn approx_eq(&self, other: &BodyShape, epsilon: f32) -> bool {
        match (self, other) {
            (
                BodyShape::Circle { radius, offset },
                BodyShape::Circle {
                    radius: r2,
                    offset: o2,
                },
            ) => (radius - r2).abs() < epsilon && offset.approx_eq(*o2, epsilon),
            (BodyShape::Polygon { vertices }, BodyShape::Polygon { vertices: v2 }) => {
                vertices.len() == v2.len()
                    && vertices
                        .iter()
                        .zip(v2.iter())
                        .all(|(a, b)| a.approx_eq(*b, epsilon))
            }
            _ => false,
        }
    }
}

/// Operations the obstacle core needs from the physics engine
pub trait PhysicsWorld {
    /// Create a static body at `position`
    fn create_body(&mut self, position: Vec2, shape: BodyShape, collisions_disabled: bool)
        -> BodyHandle;

    /// Destroy a body. Returns false if the handle was not live.
    fn destroy_body(&mut self, handle: BodyHandle) -> bool;

    /// Current shape of a live body
    fn shape(&self, handle: BodyHandle) -> Option<&BodyShape>;

    /// Replace the shape of a live body. Returns false if the handle was not live.
    fn set_shape(&mut self, handle: BodyHandle, shape: BodyShape) -> bool;
}

/// A live body in the registry
#[derive(Debug, Clone)]
pub struct Body {
    pub position: Vec2,
    pub shape: BodyShape,
    pub collisions_disabled: bool,
}

/// Shape store standing in for the solver's body list
#[derive(Debug, Default)]
pub struct BodyRegistry {
    bodies: HashMap<BodyHandle, Body>,
    next_id: u32,
    destroyed: u64,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.bodies.len()
    }

    /// Total successful destructions since creation
    pub fn destroyed_count(&self) -> u64 {
        self.destroyed
    }
}

impl PhysicsWorld for BodyRegistry {
    fn create_body(
        &mut self,
        position: Vec2,
        shape: BodyShape,
        collisions_disabled: bool,
    ) -> BodyHandle {
        let handle = BodyHandle(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.bodies.insert(
            handle,
            Body {
                position,
                shape,
                collisions_disabled,
            },
        );
        handle
    }

    fn destroy_body(&mut self, handle: BodyHandle) -> bool {
        let removed = self.bodies.remove(&handle).is_some();
        debug_assert!(removed, "body {:?} destroyed twice", handle);
        if removed {
            self.destroyed += 1;
        }
        removed
    }

    fn shape(&self, handle: BodyHandle) -> Option<&BodyShape> {
        self.bodies.get(&handle).map(|b| &b.shape)
    }

    fn set_shape(&mut self, handle: BodyHandle, shape: BodyShape) -> bool {
        match self.bodies.get_mut(&handle) {
            Some(body) => {
                body.shape = shape;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_from_circle_hitbox() {
        let hitbox = Hitbox::Circle {
            center: Vec2::new(12.0, 10.0),
            radius: 4.0,
        };
        let shape = BodyShape::from_hitbox(&hitbox, Vec2::new(10.0, 10.0));
        assert_eq!(
            shape,
            BodyShape::Circle {
                radius: 4.0,
                offset: Vec2::new(2.0, 0.0)
            }
        );
        assert_eq!(shape.extent(), 6.0);
    }

    #[test]
    fn test_shape_from_rectangle_hitbox() {
        let hitbox = Hitbox::Rectangle {
            min: Vec2::new(8.0, 9.0),
            max: Vec2::new(12.0, 11.0),
        };
        let shape = BodyShape::from_hitbox(&hitbox, Vec2::new(10.0, 10.0));
        match &shape {
            BodyShape::Polygon { vertices } => {
                assert_eq!(vertices.len(), 4);
                assert_eq!(vertices[0], Vec2::new(-2.0, -1.0));
                assert_eq!(vertices[2], Vec2::new(2.0, 1.0));
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_scaled_matches_rescaled_hitbox() {
        let origin = Vec2::new(40.0, 40.0);
        let hitbox = Hitbox::Rectangle {
            min: Vec2::new(36.0, 38.0),
            max: Vec2::new(44.0, 42.0),
        };
        let shape = BodyShape::from_hitbox(&hitbox, origin).scaled(0.5);
        let rescaled = hitbox.transform(origin, 0.5, crate::game::hitbox::Rotation::None);
        assert!(shape.approx_eq(&BodyShape::from_hitbox(&rescaled, origin), 1e-5));
    }

    #[test]
    fn test_registry_lifecycle() {
        let mut registry = BodyRegistry::new();
        let shape = BodyShape::Circle {
            radius: 2.0,
            offset: Vec2::ZERO,
        };
        let a = registry.create_body(Vec2::ZERO, shape.clone(), false);
        let b = registry.create_body(Vec2::ONE, shape.clone(), true);
        assert_ne!(a, b);
        assert_eq!(registry.live_count(), 2);
        assert!(registry.body(b).unwrap().collisions_disabled);

        assert!(registry.set_shape(a, shape.scaled(0.5)));
        assert_eq!(registry.shape(a).unwrap().extent(), 1.0);

        assert!(registry.destroy_body(a));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.destroyed_count(), 1);
        assert!(registry.shape(a).is_none());
        assert!(!registry.set_shape(a, shape));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "destroyed twice")]
    fn test_double_destroy_asserts() {
        let mut registry = BodyRegistry::new();
        let handle = registry.create_body(
            Vec2::ZERO,
            BodyShape::Circle {
                radius: 1.0,
                offset: Vec2::ZERO,
            },
            false,
        );
        registry.destroy_body(handle);
        registry.destroy_body(handle);
    }
}
