use kamera_protocol::{FacingClass, MediaSourceDescriptor};

/// Order capture devices for cycling: main back lens, auxiliary back
/// lenses, then front cameras.
///
/// Depends only on the labels, so the result is the same whatever order
/// the platform enumerated devices in (up to ties, which keep input order).
pub fn order_sources(sources: &[MediaSourceDescriptor]) -> Vec<MediaSourceDescriptor> {
    let mut ordered = sources.to_vec();
    // sort_by_key is stable
    ordered.sort_by_key(|source| rank(FacingClass::from_label(&source.human_label)));
    ordered
}

fn rank(facing: FacingClass) -> u8 {
    match facing {
        FacingClass::BackMain | FacingClass::Unknown => 0,
        FacingClass::BackAuxiliary => 1,
        FacingClass::Front => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(sources: &[MediaSourceDescriptor]) -> Vec<&str> {
        sources.iter().map(|s| s.human_label.as_str()).collect()
    }

    fn descriptors(labels: &[&str]) -> Vec<MediaSourceDescriptor> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| MediaSourceDescriptor::new(format!("dev-{}", i), *label))
            .collect()
    }

    #[test]
    fn main_back_lens_first_front_last() {
        let ordered = order_sources(&descriptors(&["Back Wide", "Back Main", "Front Camera"]));
        assert_eq!(labels(&ordered), vec!["Back Main", "Back Wide", "Front Camera"]);
    }

    #[test]
    fn ordering_ignores_enumeration_order() {
        let a = order_sources(&descriptors(&["Front Camera", "Back Ultra Wide", "Back Camera"]));
        let b = order_sources(&descriptors(&["Back Ultra Wide", "Back Camera", "Front Camera"]));
        assert_eq!(labels(&a), labels(&b));
        assert_eq!(labels(&a), vec!["Back Camera", "Back Ultra Wide", "Front Camera"]);
    }

    #[test]
    fn ties_keep_input_order() {
        let ordered = order_sources(&descriptors(&[
            "Front TrueDepth",
            "Back Ultra Wide",
            "Back Wide",
            "Front Camera",
        ]));
        assert_eq!(
            labels(&ordered),
            vec!["Back Ultra Wide", "Back Wide", "Front TrueDepth", "Front Camera"]
        );
    }

    #[test]
    fn primary_marker_beats_wide() {
        let ordered = order_sources(&descriptors(&["Ultra Wide", "Primary Wide"]));
        assert_eq!(labels(&ordered), vec!["Primary Wide", "Ultra Wide"]);
    }

    #[test]
    fn user_facing_counts_as_front() {
        let ordered = order_sources(&descriptors(&["camera2 1, facing user", "camera2 0, facing back"]));
        assert_eq!(
            labels(&ordered),
            vec!["camera2 0, facing back", "camera2 1, facing user"]
        );
    }

    #[test]
    fn empty_input() {
        assert!(order_sources(&[]).is_empty());
    }
}
