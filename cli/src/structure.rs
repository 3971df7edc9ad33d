use crate::types::{Section, SectionTiming, StructureKind, MIN_CLIP_SECONDS};

struct SectionTemplate {
    name: &'static str,
    description: &'static str,
    suffix: &'static str,
    weight: u32,
}

const INTRO_SUFFIX: &str = "introduction section setting the mood";
const OUTRO_SUFFIX: &str = "conclusion section providing resolution";

const SIMPLE: &[SectionTemplate] = &[
    SectionTemplate {
        name: "intro",
        description: "Introduction section",
        suffix: INTRO_SUFFIX,
        weight: 1,
    },
    SectionTemplate {
        name: "main",
        description: "Main body section",
        suffix: "main body section developing the theme",
        weight: 2,
    },
    SectionTemplate {
        name: "outro",
        description: "Conclusion section",
        suffix: OUTRO_SUFFIX,
        weight: 1,
    },
];

const SONG: &[SectionTemplate] = &[
    SectionTemplate {
        name: "intro",
        description: "Introduction section",
        suffix: INTRO_SUFFIX,
        weight: 1,
    },
    SectionTemplate {
        name: "verse1",
        description: "First verse section",
        suffix: "first verse section introducing the melody",
        weight: 1,
    },
    SectionTemplate {
        name: "chorus1",
        description: "First chorus section",
        suffix: "first chorus section presenting the main hook",
        weight: 1,
    },
    SectionTemplate {
        name: "verse2",
        description: "Second verse section",
        suffix: "second verse section developing the melody",
        weight: 1,
    },
    SectionTemplate {
        name: "chorus2",
        description: "Second chorus section",
        suffix: "second chorus section reinforcing the hook with more energy",
        weight: 1,
    },
    SectionTemplate {
        name: "bridge",
        description: "Bridge section",
        suffix: "bridge section offering contrast before the final chorus",
        weight: 1,
    },
    SectionTemplate {
        name: "chorus3",
        description: "Final chorus section",
        suffix: "final chorus section at peak intensity",
        weight: 1,
    },
    SectionTemplate {
        name: "outro",
        description: "Outro section",
        suffix: OUTRO_SUFFIX,
        weight: 1,
    },
];

const CLASSICAL: &[SectionTemplate] = &[
    SectionTemplate {
        name: "exposition",
        description: "Exposition section presenting main themes",
        suffix: "exposition section presenting the main themes",
        weight: 2,
    },
    SectionTemplate {
        name: "development",
        description: "Development section exploring and varying themes",
        suffix: "development section exploring and varying the themes",
        weight: 2,
    },
    SectionTemplate {
        name: "recapitulation",
        description: "Recapitulation section restating main themes",
        suffix: "recapitulation section restating the main themes",
        weight: 2,
    },
    SectionTemplate {
        name: "coda",
        description: "Coda section providing final conclusion",
        suffix: "coda section providing the final conclusion",
        weight: 1,
    },
];

/// Static table of musical forms. Unknown names never get this far: they are
/// rejected when parsing [`StructureKind`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StructureCatalog;

impl StructureCatalog {
    pub fn new() -> Self {
        Self
    }

    fn templates(kind: StructureKind) -> &'static [SectionTemplate] {
        match kind {
            StructureKind::Simple => SIMPLE,
            StructureKind::Song => SONG,
            StructureKind::Classical => CLASSICAL,
        }
    }

    /// Ordered sections with ordinals starting at 1 and concrete durations.
    pub fn sections(&self, kind: StructureKind, timing: SectionTiming) -> Vec<Section> {
        let templates = Self::templates(kind);
        let durations = match timing {
            SectionTiming::PerSection(seconds) => vec![seconds; templates.len()],
            SectionTiming::Total(total) => split_by_weight(templates, total),
        };

        templates
            .iter()
            .zip(durations)
            .enumerate()
            .map(|(index, (template, duration_seconds))| Section {
                ordinal: index as u32 + 1,
                name: template.name.to_string(),
                description: template.description.to_string(),
                suffix: template.suffix.to_string(),
                duration_seconds,
            })
            .collect()
    }
}

fn split_by_weight(templates: &[SectionTemplate], total: u32) -> Vec<u32> {
    let total_weight: u32 = templates.iter().map(|template| template.weight).sum();
    if total_weight == 0 {
        return vec![MIN_CLIP_SECONDS; templates.len()];
    }

    let mut durations: Vec<u32> = templates
        .iter()
        .map(|template| (total as u64 * template.weight as u64 / total_weight as u64) as u32)
        .collect();

    let assigned: u32 = durations.iter().sum();
    let mut remainder = total.saturating_sub(assigned);
    for duration in durations.iter_mut() {
        if remainder == 0 {
            break;
        }
        *duration += 1;
        remainder -= 1;
    }

    durations.into_iter().map(|duration| duration.max(MIN_CLIP_SECONDS)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(kind: StructureKind) -> Vec<String> {
        StructureCatalog::new()
            .sections(kind, SectionTiming::PerSection(10))
            .into_iter()
            .map(|section| section.name)
            .collect()
    }

    #[test]
    fn song_has_eight_sections_in_fixed_order() {
        assert_eq!(
            names(StructureKind::Song),
            ["intro", "verse1", "chorus1", "verse2", "chorus2", "bridge", "chorus3", "outro"]
        );
    }

    #[test]
    fn simple_and_classical_forms() {
        assert_eq!(names(StructureKind::Simple), ["intro", "main", "outro"]);
        assert_eq!(
            names(StructureKind::Classical),
            ["exposition", "development", "recapitulation", "coda"]
        );
    }

    #[test]
    fn ordinals_are_contiguous_from_one() {
        let catalog = StructureCatalog::new();
        let sections = catalog.sections(StructureKind::Song, SectionTiming::PerSection(20));
        assert!(sections.iter().map(|section| section.ordinal).eq(1..=8));
        assert!(sections.iter().all(|section| section.duration_seconds == 20));
    }

    #[test]
    fn intro_and_outro_share_suffixes() {
        let catalog = StructureCatalog::new();
        for kind in [StructureKind::Simple, StructureKind::Song] {
            let sections = catalog.sections(kind, SectionTiming::PerSection(10));
            assert_eq!(sections.first().unwrap().suffix, INTRO_SUFFIX);
            assert_eq!(sections.last().unwrap().suffix, OUTRO_SUFFIX);
        }
    }

    #[test]
    fn total_duration_is_split_by_weight() {
        let catalog = StructureCatalog::new();
        let sections = catalog.sections(StructureKind::Simple, SectionTiming::Total(120));
        let durations: Vec<u32> = sections.iter().map(|s| s.duration_seconds).collect();
        assert_eq!(durations, [30, 60, 30]);

        let sections = catalog.sections(StructureKind::Classical, SectionTiming::Total(100));
        let durations: Vec<u32> = sections.iter().map(|s| s.duration_seconds).collect();
        assert_eq!(durations.iter().sum::<u32>(), 100);
        assert_eq!(durations, [29, 29, 28, 14]);
    }

    #[test]
    fn split_never_drops_below_minimum() {
        let catalog = StructureCatalog::new();
        let sections = catalog.sections(StructureKind::Song, SectionTiming::Total(16));
        assert!(sections.iter().all(|section| section.duration_seconds >= MIN_CLIP_SECONDS));
    }
}
