use std::time::Instant;

/// Per-frame counters and timings, reset at the start of every frame.
#[derive(Clone, Debug, Default)]
pub struct FrameStatistics {
    frame_begin: Option<Instant>,
    pub frame_time_ms: f64,
    pub layer_rendering_time_ms: f64,
    pub ordered_rendering_time_ms: f64,
    pub terrain_tile_count: usize,
    pub rendered_tile_count: usize,
    pub vbo_load_count: usize,
    pub frame_count: u64,
}

impl FrameStatistics {
    pub fn begin_frame(&mut self) {
        self.frame_begin = Some(Instant::now());
        self.layer_rendering_time_ms = 0.0;
        self.ordered_rendering_time_ms = 0.0;
        self.terrain_tile_count = 0;
        self.rendered_tile_count = 0;
        self.vbo_load_count = 0;
    }

    pub fn end_frame(&mut self) {
        if let Some(begin) = self.frame_begin.take() {
            self.frame_time_ms = begin.elapsed().as_secs_f64() * 1000.0;
        }
        self.frame_count += 1;
    }

    pub fn set_terrain_tile_count(&mut self, count: usize) {
        self.terrain_tile_count = count;
    }

    pub fn increment_rendered_tile_count(&mut self, amount: usize) {
        self.rendered_tile_count += amount;
    }

    pub fn increment_vbo_load_count(&mut self, amount: usize) {
        self.vbo_load_count += amount;
    }

    pub fn add_layer_rendering_time(&mut self, milliseconds: f64) {
        self.layer_rendering_time_ms += milliseconds;
    }

    pub fn add_ordered_rendering_time(&mut self, milliseconds: f64) {
        self.ordered_rendering_time_ms += milliseconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_frame_resets_per_frame_counters() {
        let mut stats = FrameStatistics::default();
        stats.begin_frame();
        stats.increment_vbo_load_count(3);
        stats.set_terrain_tile_count(12);
        stats.end_frame();
        assert_eq!(stats.frame_count, 1);
        assert_eq!(stats.vbo_load_count, 3);

        stats.begin_frame();
        assert_eq!(stats.vbo_load_count, 0);
        assert_eq!(stats.terrain_tile_count, 0);
        stats.end_frame();
        assert_eq!(stats.frame_count, 2);
    }
}
