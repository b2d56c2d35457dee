mod common;

use std::sync::Arc;

use framesync::provider::{ImageListProvider, SyntheticProvider};
use framesync::video::{ChannelRequestor, NO_REPLY};
use framesync::{
    Context, ControllerConfig, ControllerEvent, Error, SeekFallback, SeekMode, SourceConfig,
    TimeStamp, VideoController, VideoSource,
};

use common::{ready, replies, source, TIMEOUT};

fn manual() -> ControllerConfig {
    ControllerConfig {
        seek_to_first: false,
        ..ControllerConfig::default()
    }
}

fn selected(events: &flume::Receiver<ControllerEvent>) -> Vec<(i64, u64)> {
    events
        .try_iter()
        .filter_map(|event| match event {
            ControllerEvent::TimeSelected { time, request_id } => Some((time, request_id)),
            _ => None,
        })
        .collect()
}

#[test]
fn times_are_the_union_of_all_sources() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let first = source(&context, SyntheticProvider::new("a", [100, 400]));
    let second = source(&context, SyntheticProvider::new("b", [250, 400]));
    let events = controller.subscribe();

    controller.add_video_source(first.clone());
    controller.add_video_source(second.clone());
    ready(&context, &first);
    ready(&context, &second);

    assert_eq!(controller.video_sources(), vec![first.id(), second.id()]);
    assert_eq!(controller.times().keys().collect::<Vec<_>>(), vec![100, 250, 400]);

    controller.remove_video_source(first.id()).unwrap();
    assert_eq!(controller.video_sources(), vec![second.id()]);
    assert!(controller.distributor(first.id()).is_none());
    assert_eq!(controller.times().keys().collect::<Vec<_>>(), vec![250, 400]);

    let changes = events
        .try_iter()
        .filter(|event| *event == ControllerEvent::SourcesChanged)
        .count();
    assert_eq!(changes, 3);
}

#[test]
fn adding_a_source_twice_keeps_one_distributor() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let source = source(&context, SyntheticProvider::new("a", [100]));

    let first = controller.add_video_source(source.clone());
    let second = controller.add_video_source(source.clone());
    let (consumer, _rx) = ChannelRequestor::new();
    first.add_consumer(&consumer);

    assert_eq!(controller.video_sources().len(), 1);
    assert_eq!(second.consumers().len(), 1);
}

#[test]
fn removing_an_unknown_source_is_an_error() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let stranger = source(&context, SyntheticProvider::new("a", [100]));

    let err = controller.remove_video_source(stranger.id()).unwrap_err();
    assert!(matches!(err, Error::UnknownSource(id) if id == stranger.id()));
}

#[test]
fn seek_falls_back_to_nearest_where_the_time_is_missing() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let first = source(&context, SyntheticProvider::new("a", [100, 400]));
    let second = source(&context, SyntheticProvider::new("b", [250, 400]));
    controller.add_video_source(first.clone());
    controller.add_video_source(second.clone());
    ready(&context, &first);
    ready(&context, &second);

    let (left, left_rx) = ChannelRequestor::new();
    let (right, right_rx) = ChannelRequestor::new();
    controller.add_consumer(first.id(), &left).unwrap();
    controller.add_consumer(second.id(), &right).unwrap();
    let events = controller.subscribe();

    controller.seek(250, 9);
    assert_eq!(controller.time(), Some(250));
    assert_eq!(selected(&events), vec![(250, 9)]);

    // Equidistant from 100 and 400; the earlier key wins
    let left = replies(&context, &left_rx, 1).remove(0);
    assert_eq!(left.info.request_id, 9);
    assert_eq!(left.info.time, 250);
    assert_eq!(left.info.mode, SeekMode::Nearest);
    assert_eq!(left.frame.unwrap().time(), Some(100));

    let right = replies(&context, &right_rx, 1).remove(0);
    assert_eq!(right.info.request_id, 9);
    assert_eq!(right.info.mode, SeekMode::Exact);
    assert_eq!(right.frame.unwrap().time(), Some(250));
}

#[test]
fn seek_without_fallback_leaves_missing_sources_empty() {
    let context = Context::new();
    let controller = VideoController::with_config(ControllerConfig {
        seek_fallback: SeekFallback::None,
        seek_to_first: false,
    });
    let source = source(&context, SyntheticProvider::new("a", [100, 400]));
    controller.add_video_source(source.clone());
    ready(&context, &source);

    let (consumer, rx) = ChannelRequestor::new();
    controller.add_consumer(source.id(), &consumer).unwrap();

    controller.seek(250, 4);
    let reply = replies(&context, &rx, 1).remove(0);
    assert_eq!(reply.info.mode, SeekMode::Exact);
    assert!(reply.frame.is_none());
}

#[test]
fn seek_nearest_snaps_to_a_known_time() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let first = source(&context, SyntheticProvider::new("a", [100, 380]));
    let second = source(&context, SyntheticProvider::new("b", [250]));
    controller.add_video_source(first.clone());
    controller.add_video_source(second.clone());
    ready(&context, &first);
    ready(&context, &second);

    let (left, left_rx) = ChannelRequestor::new();
    let (right, right_rx) = ChannelRequestor::new();
    controller.add_consumer(first.id(), &left).unwrap();
    controller.add_consumer(second.id(), &right).unwrap();

    controller.seek_nearest(300, 3);
    assert_eq!(controller.time(), Some(250));

    let left = replies(&context, &left_rx, 1).remove(0);
    assert_eq!(left.info.mode, SeekMode::Nearest);
    assert_eq!(left.frame.unwrap().time(), Some(380));
    let right = replies(&context, &right_rx, 1).remove(0);
    assert_eq!(right.frame.unwrap().time(), Some(250));
}

#[test]
fn stepping_walks_the_union_and_stops_at_the_ends() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let first = source(&context, SyntheticProvider::new("a", [100, 300]));
    let second = source(&context, SyntheticProvider::new("b", [200]));
    controller.add_video_source(first.clone());
    controller.add_video_source(second.clone());
    ready(&context, &first);
    ready(&context, &second);
    let events = controller.subscribe();

    assert!(!controller.previous_frame(NO_REPLY));
    assert_eq!(controller.time(), None);

    assert!(controller.next_frame(NO_REPLY));
    assert_eq!(controller.time(), Some(100));
    assert!(controller.next_frame(NO_REPLY));
    assert!(controller.next_frame(1));
    assert_eq!(controller.time(), Some(300));

    assert!(!controller.next_frame(NO_REPLY));
    assert_eq!(controller.time(), Some(300));
    assert_eq!(
        selected(&events),
        vec![(100, NO_REPLY), (200, NO_REPLY), (300, 1)]
    );

    assert!(controller.previous_frame(NO_REPLY));
    assert_eq!(controller.time(), Some(200));
}

#[test]
fn reseeking_the_current_time_needs_a_request_id() {
    let controller = VideoController::with_config(manual());
    let events = controller.subscribe();

    controller.seek(100, NO_REPLY);
    controller.seek(100, NO_REPLY);
    controller.seek(100, 5);
    assert_eq!(selected(&events), vec![(100, NO_REPLY), (100, 5)]);
}

#[test]
fn first_frames_select_the_first_time() {
    let context = Context::new();
    let controller = VideoController::with_config(ControllerConfig::default());
    let source = source(&context, SyntheticProvider::new("a", [150, 300]));
    controller.add_video_source(source.clone());

    let (consumer, rx) = ChannelRequestor::new();
    controller.add_consumer(source.id(), &consumer).unwrap();

    assert!(context.process_until(TIMEOUT, || controller.time().is_some()));
    assert_eq!(controller.time(), Some(150));
    let reply = replies(&context, &rx, 1).remove(0);
    assert_eq!(reply.frame.unwrap().time(), Some(150));
}

#[test]
fn late_consumer_receives_the_current_frame() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let source = source(&context, SyntheticProvider::new("a", [100, 200]));
    controller.add_video_source(source.clone());
    ready(&context, &source);
    controller.seek(200, NO_REPLY);

    let (consumer, rx) = ChannelRequestor::new();
    controller.add_consumer(source.id(), &consumer).unwrap();
    let reply = replies(&context, &rx, 1).remove(0);
    assert_eq!(reply.frame.unwrap().time(), Some(200));
}

#[test]
fn removing_the_last_source_clears_the_time() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let source = source(&context, SyntheticProvider::new("a", [100]));
    controller.add_video_source(source.clone());
    controller.seek(100, NO_REPLY);

    controller.remove_video_source(source.id()).unwrap();
    assert_eq!(controller.time(), None);
    assert!(controller.times().is_empty());
}

#[test]
fn invalidated_source_updates_the_times() {
    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let source = source(
        &context,
        SyntheticProvider::new("a", [100]).with_late_times([50]),
    );
    controller.add_video_source(source.clone());
    ready(&context, &source);
    assert_eq!(controller.times().keys().collect::<Vec<_>>(), vec![100]);

    source.invalidate();
    assert!(context.process_until(TIMEOUT, || controller.times().len() == 2));
    assert_eq!(controller.times().keys().collect::<Vec<_>>(), vec![50, 100]);
}

#[test]
fn frames_without_an_index_are_still_known() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    image::RgbImage::from_pixel(2, 2, image::Rgb([40, 40, 40]))
        .save(&path)
        .unwrap();

    let context = Context::new();
    let controller = VideoController::with_config(manual());
    let source = Arc::new(VideoSource::with_config(
        ImageListProvider::new(vec![(TimeStamp::from_time(500), path)]),
        context.handle(),
        SourceConfig::default(),
    ));
    controller.add_video_source(source.clone());
    ready(&context, &source);

    let frames: Vec<_> = source.frames().iter().map(|(t, f)| (t, *f)).collect();
    assert_eq!(frames, vec![(500, 1)]);
    assert!(source.has_time(500));
    assert_eq!(controller.times().keys().collect::<Vec<_>>(), vec![500]);

    let (consumer, rx) = ChannelRequestor::new();
    controller.add_consumer(source.id(), &consumer).unwrap();
    assert!(controller.next_frame(NO_REPLY));
    assert_eq!(controller.time(), Some(500));

    let reply = replies(&context, &rx, 1).remove(0);
    assert_eq!(reply.info.mode, SeekMode::Exact);
    assert_eq!(reply.frame.unwrap().image.data[0], 40);
}
