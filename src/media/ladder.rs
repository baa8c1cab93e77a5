//! Rendition ladder and per-source planning.

use serde::Serialize;

/// One rung of the quality ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rendition {
    pub name: &'static str,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

pub const LADDER: [Rendition; 3] = [
    Rendition {
        name: "480p",
        height: 480,
        video_bitrate_kbps: 1000,
        audio_bitrate_kbps: 128,
    },
    Rendition {
        name: "720p",
        height: 720,
        video_bitrate_kbps: 2500,
        audio_bitrate_kbps: 128,
    },
    Rendition {
        name: "1080p",
        height: 1080,
        video_bitrate_kbps: 5000,
        audio_bitrate_kbps: 192,
    },
];

/// A rendition selected for a concrete source, with its output geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedRendition {
    pub rendition: Rendition,
    pub width: u32,
}

impl PlannedRendition {
    pub fn name(&self) -> &'static str {
        self.rendition.name
    }

    pub fn height(&self) -> u32 {
        self.rendition.height
    }

    /// Height is pinned, width follows the source aspect ratio. The encoder
    /// rounds width to the nearest even value.
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.rendition.height)
    }

    pub fn bandwidth(&self) -> u64 {
        u64::from(self.rendition.video_bitrate_kbps) * 1000
    }
}

/// `round(target_height * source_width / source_height)`, the same for every
/// orientation.
pub fn scaled_width(source_width: u32, source_height: u32, target_height: u32) -> u32 {
    if source_height == 0 {
        return 0;
    }
    let width = f64::from(target_height) * f64::from(source_width) / f64::from(source_height);
    width.round() as u32
}

/// Renditions to produce for a source, ascending by height. Rungs taller than
/// the source are skipped; a rung equal to the source height is kept.
pub fn plan_renditions(
    source_width: u32,
    source_height: u32,
    ladder: &[Rendition],
) -> Vec<PlannedRendition> {
    let mut planned: Vec<PlannedRendition> = ladder
        .iter()
        .filter(|r| r.height <= source_height)
        .map(|r| PlannedRendition {
            rendition: *r,
            width: scaled_width(source_width, source_height, r.height),
        })
        .collect();

    planned.sort_by_key(|p| p.rendition.height);
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(planned: &[PlannedRendition]) -> Vec<&'static str> {
        planned.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn portrait_full_hd_gets_every_rung() {
        let planned = plan_renditions(1080, 1920, &LADDER);

        assert_eq!(names(&planned), vec!["480p", "720p", "1080p"]);
        let widths: Vec<u32> = planned.iter().map(|p| p.width).collect();
        assert_eq!(widths, vec![270, 405, 608]);
    }

    #[test]
    fn small_portrait_gets_only_480p() {
        let planned = plan_renditions(360, 640, &LADDER);

        assert_eq!(names(&planned), vec!["480p"]);
        assert_eq!(planned[0].width, 270);
    }

    #[test]
    fn equal_height_includes_rung() {
        assert_eq!(names(&plan_renditions(1280, 720, &LADDER)), vec!["480p", "720p"]);
        assert_eq!(names(&plan_renditions(854, 480, &LADDER)), vec!["480p"]);
    }

    #[test]
    fn tiny_source_plans_nothing() {
        assert!(plan_renditions(426, 240, &LADDER).is_empty());
    }

    #[test]
    fn produced_set_matches_height_filter_for_any_height() {
        for height in [1, 239, 479, 480, 481, 719, 720, 1079, 1080, 1081, 2160] {
            let planned = plan_renditions(1920, height, &LADDER);
            let expected: Vec<&str> = LADDER
                .iter()
                .filter(|r| r.height <= height)
                .map(|r| r.name)
                .collect();
            assert_eq!(names(&planned), expected, "source height {}", height);
        }
    }

    #[test]
    fn unordered_ladder_is_planned_ascending() {
        let ladder = [LADDER[2], LADDER[0], LADDER[1]];
        let planned = plan_renditions(1920, 1080, &ladder);
        assert_eq!(names(&planned), vec!["480p", "720p", "1080p"]);
    }

    #[test]
    fn orientation_does_not_change_geometry_formula() {
        for (w, h) in [(1920, 1080), (1080, 1080), (1080, 1920), (1000, 1333)] {
            for planned in plan_renditions(w, h, &LADDER) {
                let expected = (f64::from(planned.height()) * f64::from(w) / f64::from(h)).round();
                assert_eq!(planned.width, expected as u32);
                assert_eq!(planned.scale_filter(), format!("scale=-2:{}", planned.height()));
            }
        }
    }

    #[test]
    fn landscape_widths() {
        let planned = plan_renditions(1920, 1080, &LADDER);
        let widths: Vec<u32> = planned.iter().map(|p| p.width).collect();
        assert_eq!(widths, vec![853, 1280, 1920]);
    }

    #[test]
    fn bandwidth_is_video_bitrate_in_bits() {
        let planned = plan_renditions(1920, 1080, &LADDER);
        assert_eq!(planned[1].bandwidth(), 2_500_000);
    }
}
