use super::*;

fn detector() -> ExperimentBoundaryDetector {
    ExperimentBoundaryDetector::new(SegmentationSettings::default()).expect("detector builds")
}

const SHARED_METHODS_PAPER: &str = "Visual search in clutter\n\nWe ran two studies.\n\nExperiment 1\nWe tested search with a small set size.\n\nExperiment 2\nWe doubled the set size.\n\nMethod\nParticipants: 24 were recruited.\nEach block contained 40 trials.\n\nResults Experiment 1\nSearch was fast.\n\nResults Experiment 2\nSearch was slow.";

#[test]
fn headers_partition_the_document_from_first_header() {
    let headers = ["Experiment 1", "Experiment 2: Replication", "Experiment 3"];
    let text = format!(
        "Preamble text.\n\n{}\nBody one.\n\n{}\nBody two.\n\n{}\nBody three.",
        headers[0], headers[1], headers[2]
    );
    let layout = detector().detect(&text);

    assert_eq!(layout.ranges.len(), 3);
    assert_eq!(
        layout.ranges.iter().map(|range| range.number).collect::<Vec<u32>>(),
        vec![1, 2, 3]
    );
    assert_eq!(layout.ranges[0].start_offset, text.find("Experiment 1").unwrap_or_default());
    for pair in layout.ranges.windows(2) {
        assert_eq!(pair[0].end_offset, pair[1].start_offset);
    }
    assert_eq!(layout.ranges[2].end_offset, text.len());
    assert_eq!(layout.ranges[1].title, "Replication");
    assert_eq!(layout.ranges[0].title, "Experiment 1");
    assert_eq!(layout.preamble(&text), "Preamble text.\n\n");
}

#[test]
fn numeral_forms_are_recognized() {
    let cases = [
        ("Experiment 2\nText.", 2),
        ("EXPERIMENT IV\nText.", 4),
        ("Experiment Three\nText.", 3),
        ("The Second Experiment\nText.", 2),
        ("3.1 Experiment 5: Masking\nText.", 5),
    ];

    for (text, expected) in cases {
        let layout = detector().detect(text);
        assert_eq!(
            layout.ranges.iter().map(|range| range.number).collect::<Vec<u32>>(),
            vec![expected],
            "header in {text:?}"
        );
    }
}

#[test]
fn prose_mentions_are_not_headers() {
    let text = "Experiment 1 showed that attention matters.\nIn Experiment 2 we replicated it.\nThe first experiment was short.";
    let layout = detector().detect(text);
    assert!(layout.ranges.is_empty());
}

#[test]
fn duplicate_numbers_keep_first_occurrence() {
    let text = "Experiment 1\nFirst body.\n\nExperiment 1\nRepeated header.\n\nExperiment 2\nSecond body.";
    let layout = detector().detect(text);

    assert_eq!(layout.ranges.len(), 2);
    assert_eq!(layout.ranges[0].start_offset, 0);
    assert_eq!(layout.ranges[1].number, 2);
    assert_eq!(layout.ranges[0].end_offset, layout.ranges[1].start_offset);
}

#[test]
fn shared_methods_are_spliced_after_the_header_line() {
    let detector = detector();
    let layout = detector.detect(SHARED_METHODS_PAPER);

    assert_eq!(layout.ranges.len(), 2);
    let shared = layout.shared_methods.expect("shared methods found");
    assert!(SHARED_METHODS_PAPER[shared.start..shared.end].starts_with("Method"));
    assert!(!SHARED_METHODS_PAPER[shared.start..shared.end].contains("Search was fast"));
    assert!(!layout.ranges[0].has_local_methods);

    let texts = detector.experiment_texts(SHARED_METHODS_PAPER, &layout);
    let first = &texts[0];
    assert!(first.shared_methods_spliced);
    assert!(first.text.starts_with("Experiment 1\n\nMethod"));
    assert!(first.text.contains("Participants: 24 were recruited."));
    assert!(first.text.contains("We tested search with a small set size."));

    assert!(texts[1].text.contains("Participants: 24 were recruited."));
}

#[test]
fn search_window_edge_does_not_shorten_prose_lines() {
    let text = "Experiment 1\nFirst body.\n\nExperiment 2\nParticipants in this study were recruited from the local university pool and were paid.\n\nResults\nDone.";
    let settings = SegmentationSettings {
        shared_methods_search_window: 60,
        ..SegmentationSettings::default()
    };
    let detector = ExperimentBoundaryDetector::new(settings).expect("detector builds");
    let layout = detector.detect(text);

    assert_eq!(layout.ranges.len(), 2);
    assert!(layout.shared_methods.is_none());
}

#[test]
fn methods_inside_first_experiment_are_local() {
    let text = "Experiment 1\nMethod\nLocal methods text.\n\nExperiment 2\nMethod\nMore local text.";
    let detector = detector();
    let layout = detector.detect(text);

    assert!(layout.ranges.iter().all(|range| range.has_local_methods));
    assert!(layout.shared_methods.is_none());
    let texts = detector.experiment_texts(text, &layout);
    assert!(texts.iter().all(|experiment| !experiment.shared_methods_spliced));
}

#[test]
fn long_overview_before_first_methods_is_dropped() {
    let overview = "This overview paragraph describes the motivation of the first experiment at length. ".repeat(3);
    let text = format!(
        "Experiment 1: Priming\n{overview}\n\nMethod\nParticipants were 30 students.\n\nExperiment 2\nMethod\nOther text."
    );
    let detector = detector();
    let layout = detector.detect(&text);
    let texts = detector.experiment_texts(&text, &layout);

    let first = &texts[0];
    assert!(first.overview_chars_dropped > 100);
    assert!(first.text.starts_with("Experiment 1: Priming\n\nMethod"));
    assert!(!first.text.contains("motivation"));
}

#[test]
fn short_overview_is_kept() {
    let text = "Experiment 1\nBrief note.\n\nMethod\nParticipants were 30 students.\n\nExperiment 2\nMethod\nOther.";
    let detector = detector();
    let layout = detector.detect(text);
    let texts = detector.experiment_texts(text, &layout);

    assert_eq!(texts[0].overview_chars_dropped, 0);
    assert!(texts[0].text.contains("Brief note."));
}

#[test]
fn overlong_header_lines_are_rejected() {
    let text = format!("Experiment 1 {}\nBody.", "Long title word ".repeat(10));
    let layout = detector().detect(&text);
    assert!(layout.ranges.is_empty());
}
