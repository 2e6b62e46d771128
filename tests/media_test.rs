//! Chunked audio: ordered transcription and chunk merging

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use recall_coach::voice::audio::{self, AudioBuffer};
use recall_coach::voice::synthesis::chunk_path;
use recall_coach::voice::{merge_chunks, MergeOutcome, SpeechRecognizer, Transcriber};
use recall_coach::Result;

/// Names each chunk by its fill value; the first chunk is the slowest
struct SlowFirst;

#[async_trait]
impl SpeechRecognizer for SlowFirst {
    async fn transcribe_chunk(&self, samples: &[f32]) -> Result<String> {
        let index = samples[0] as usize;
        tokio::time::sleep(Duration::from_millis(40 / (index as u64 + 1))).await;
        Ok(["A", "B", "C"][index].to_string())
    }
}

#[tokio::test]
async fn test_three_chunks_join_in_order() {
    // 3 chunks of 100 samples at 100 Hz, chunk i filled with i
    let samples: Vec<f32> = (0..300).map(|i| (i / 100) as f32).collect();
    let buffer = AudioBuffer::from_samples(samples, 100, 1);

    for batch_size in [1, 2, 3] {
        let transcriber = Transcriber::new(Arc::new(SlowFirst))
            .with_sample_rate(100)
            .with_chunk_secs(1)
            .with_batch_size(batch_size);
        assert_eq!(transcriber.transcribe(&buffer).await.as_deref(), Some("A B C"));
    }
}

#[tokio::test]
async fn test_merge_gap_and_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("merged.wav");

    assert_eq!(
        merge_chunks(dir.path(), &output, "ffmpeg").await.unwrap(),
        MergeOutcome::NothingToMerge
    );
    assert!(!output.exists());

    for index in [0, 1, 3] {
        let chunk = AudioBuffer::from_samples(vec![0.1 * (index + 1) as f32; 50], 24000, 1);
        audio::save_wav(&chunk, &chunk_path(dir.path(), index)).unwrap();
    }
    let outcome = merge_chunks(dir.path(), &output, "ffmpeg").await.unwrap();
    assert_eq!(outcome, MergeOutcome::Merged { path: output.clone(), chunks: 2 });
    assert_eq!(audio::load_wav(&output).unwrap().len(), 100);
}
