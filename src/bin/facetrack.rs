use anyhow::{anyhow, Result};
use clap::Parser;
use facetrack::{visualization, Config, FaceDetector, OpencvTrackerFactory, Tracker};
use opencv::{
    core::Size,
    highgui, imgcodecs,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::{fs, path::PathBuf};

#[derive(Parser)]
#[command(
    name = "facetrack",
    about = "Detection-anchored face tracking for video",
    version = "0.1.0"
)]
struct Args {
    /// Path to input video file
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Output path (.mp4 video file or directory for frames)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to model weights (overrides config)
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Show a live window
    #[arg(short, long)]
    visualize: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!("loading configuration from {:?}", args.config);
    let mut config = Config::from_file(&args.config.to_string_lossy())?;
    if let Some(weights) = &args.weights {
        config.model_path = weights.to_string_lossy().to_string();
    }

    log::info!("initializing detector with weights from {}", config.model_path);
    let detector = FaceDetector::new(
        &config.model_path,
        &config.device,
        (config.input_size[0] as i64, config.input_size[1] as i64),
        config.conf_threshold,
        config.nms_threshold,
    )?;

    let mut tracker = Tracker::new(&config, Box::new(OpencvTrackerFactory));
    tracker.add_detector(Box::new(detector));

    let mut cap = VideoCapture::from_file(&args.input.to_string_lossy(), videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        return Err(anyhow!("failed to open video file: {:?}", args.input));
    }

    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
    let total_frames = cap.get(videoio::CAP_PROP_FRAME_COUNT)? as i64;
    let fps = cap.get(videoio::CAP_PROP_FPS)?;
    log::info!(
        "video: {}x{}, {} frames, {:.2} fps",
        width,
        height,
        total_frames,
        fps
    );

    // .mp4 output gets a video writer, anything else a frame directory
    let mut writer: Option<VideoWriter> = None;
    let mut frames_dir: Option<PathBuf> = None;
    if let Some(output) = &args.output {
        if output.extension().and_then(|e| e.to_str()) == Some("mp4") {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
            let fourcc = VideoWriter::fourcc('a', 'v', 'c', '1')?;
            let w = VideoWriter::new(
                &output.to_string_lossy(),
                fourcc,
                fps,
                Size::new(width, height),
                true,
            )?;
            if w.is_opened()? {
                writer = Some(w);
            } else {
                log::warn!("failed to open video writer, falling back to an image sequence");
                frames_dir = Some(output.clone());
            }
        } else {
            frames_dir = Some(output.clone());
        }
        if let Some(dir) = &frames_dir {
            fs::create_dir_all(dir)?;
        }
    }

    if args.visualize {
        highgui::named_window("facetrack", highgui::WINDOW_NORMAL)?;
        highgui::resize_window("facetrack", width, height)?;
    }

    let mut frame = Mat::default();
    let mut frame_id: i64 = 0;
    while cap.read(&mut frame)? {
        if frame.empty() {
            break;
        }
        frame_id += 1;

        let results = tracker.push_frame(&frame)?;
        if tracker.take_segmentation_drawing() {
            log::debug!("frame {}: segmentation overlay attached", frame_id);
        }

        let mut annotated = frame.clone();
        visualization::draw_frame_info(&mut annotated, frame_id, fps)?;
        visualization::draw_results(&mut annotated, &results)?;

        if let Some(dir) = &frames_dir {
            let path = dir.join(format!("frame_{:06}.jpg", frame_id));
            imgcodecs::imwrite(
                &path.to_string_lossy(),
                &annotated,
                &opencv::core::Vector::new(),
            )?;
        }
        if let Some(writer) = &mut writer {
            writer.write(&annotated)?;
        }
        if args.visualize {
            highgui::imshow("facetrack", &annotated)?;
            if highgui::wait_key(1)? == 27 {
                log::info!("interrupted by user");
                break;
            }
        }

        if frame_id % 100 == 0 {
            log::info!("processed {}/{} frames", frame_id, total_frames);
        }
    }

    log::info!("done, processed {} frames", frame_id);
    Ok(())
}
