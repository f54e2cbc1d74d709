use std::collections::HashMap;

use crate::geocoder::GeocodeError;
use crate::map::view::{MapOptions, MapState, MapView};

/// Which map view, if any, is bound to each container.
#[derive(Debug, Default)]
pub struct MapRegistry {
    views: HashMap<String, MapView>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the view bound to `container_id`, creating and initializing
    /// one only if none is bound or the previous one was disposed. `setup`
    /// runs on a newly created view before it initializes.
    pub fn mount(
        &mut self,
        container_id: &str,
        options: MapOptions,
        setup: impl FnOnce(&mut MapView),
    ) -> Result<&mut MapView, GeocodeError> {
        let bound = self
            .views
            .get(container_id)
            .is_some_and(|v| v.state() != MapState::Disposed);

        if bound {
            tracing::debug!(container_id, "map already bound to container, skipping init");
        } else {
            let mut view = MapView::new(container_id, options);
            setup(&mut view);
            view.initialize()?;
            self.views.insert(container_id.to_string(), view);
        }

        self.views
            .get_mut(container_id)
            .ok_or_else(|| GeocodeError::MapInit(format!("container {container_id} lost its view")))
    }

    /// Disposes and releases the container's view.
    pub fn unmount(&mut self, container_id: &str) -> bool {
        match self.views.remove(container_id) {
            Some(mut view) => {
                view.dispose();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, container_id: &str) -> Option<&MapView> {
        self.views.get(container_id)
    }

    pub fn get_mut(&mut self, container_id: &str) -> Option<&mut MapView> {
        self.views.get_mut(container_id)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }
}
