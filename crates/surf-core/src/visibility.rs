//! VisibilityGate: per-frame visible/active flags for placements.
//!
//! A placement is visible when the observer roughly faces it and it is within
//! reach. Among visible placements the nearest one the observer looks at
//! directly becomes the single active placement; creation order breaks
//! distance ties. With a non-zero `hysteresis` the thresholds are relaxed for
//! placements that already hold the flag, which stops edge flicker.

use crate::config::VisibilitySection;
use crate::event::DetectorEvent;
use crate::placement::PlacementId;
use crate::pose::ObserverPose;
use crate::registry::Registry;

pub struct VisibilityGate<'a> {
    config: &'a VisibilitySection,
}

impl<'a> VisibilityGate<'a> {
    pub fn new(config: &'a VisibilitySection) -> Self {
        Self { config }
    }

    fn is_visible(&self, distance: f32, alignment: f32, was_visible: bool) -> bool {
        let slack = if was_visible { self.config.hysteresis } else { 0.0 };
        alignment > self.config.visible_alignment - slack
            && distance < self.config.visible_max_distance + slack
    }

    fn can_be_active(&self, alignment: f32, was_active: bool) -> bool {
        let slack = if was_active { self.config.hysteresis } else { 0.0 };
        alignment > self.config.active_alignment - slack
    }

    /// Recompute flags for every placement and emit the changes.
    ///
    /// The previously active placement is switched off before the new one is
    /// switched on, so consumers never see two active placements.
    pub fn update(
        &self,
        registry: &mut Registry,
        observer: &ObserverPose,
        events: &mut Vec<DetectorEvent>,
    ) {
        let mut active: Option<(f32, u64, PlacementId)> = None;
        let mut visibility = Vec::with_capacity(registry.placement_count());

        for p in registry.placements() {
            let (distance, alignment) = observer.distance_and_alignment(p.position);
            let visible = self.is_visible(distance, alignment, p.is_visible);
            visibility.push(visible);
            if !visible || !self.can_be_active(alignment, p.is_active) {
                continue;
            }
            let closer = match active {
                None => true,
                Some((d, seq, _)) => distance < d || (distance == d && p.seq < seq),
            };
            if closer {
                active = Some((distance, p.seq, p.id));
            }
        }
        let active_id = active.map(|(_, _, id)| id);

        let placements = registry.placements_mut();
        for (p, visible) in placements.iter_mut().zip(visibility) {
            if p.is_visible != visible {
                p.is_visible = visible;
                events.push(DetectorEvent::PlacementVisibilityChanged {
                    placement_id: p.id,
                    is_visible: visible,
                });
            }
        }

        let previous = placements.iter().find(|p| p.is_active).map(|p| p.id);
        if previous == active_id {
            return;
        }
        for p in placements.iter_mut() {
            if Some(p.id) == previous {
                p.is_active = false;
                events.push(DetectorEvent::PlacementActiveChanged {
                    placement_id: p.id,
                    is_active: false,
                });
            }
        }
        for p in placements.iter_mut() {
            if Some(p.id) == active_id {
                p.is_active = true;
                tracing::debug!("placement {} is now active", p.id);
                events.push(DetectorEvent::PlacementActiveChanged {
                    placement_id: p.id,
                    is_active: true,
                });
            }
        }
    }
}
