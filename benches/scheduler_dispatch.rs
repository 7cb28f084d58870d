use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use dualstt::audio::AudioSnapshot;
use dualstt::decode::DecodeProfile;
use dualstt::scheduler::{CompletionStatus, JobClass, JobRequest, PriorityScheduler};
use dualstt::session::SessionId;
use std::hint::black_box;

/// One second of audio, shared by every request.
fn snapshot() -> AudioSnapshot {
    AudioSnapshot::new(vec![0; 16000], 0, 16000)
}

fn request(class: JobClass, session: u64, sequence: u64, snapshot: &AudioSnapshot) -> JobRequest {
    JobRequest {
        class,
        session: SessionId(session),
        snapshot: snapshot.clone(),
        sequence,
        utterance: sequence + 1,
        profile: DecodeProfile::for_class(class, "en"),
    }
}

/// Enqueue one final and one interim per session, then drain everything.
fn enqueue_and_drain(c: &mut Criterion) {
    let snapshot = snapshot();
    let mut group = c.benchmark_group("enqueue_and_drain");

    for sessions in [1u64, 16, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(sessions),
            &sessions,
            |b, &sessions| {
                b.iter(|| {
                    let scheduler = PriorityScheduler::new();
                    for session in 0..sessions {
                        scheduler.enqueue(request(JobClass::Final, session, 0, &snapshot));
                        scheduler.enqueue(request(JobClass::Interim, session, 0, &snapshot));
                    }
                    while let Some(job) = scheduler.try_next() {
                        let completed = scheduler.complete(&job, CompletionStatus::Succeeded);
                        black_box(completed.is_ok());
                    }
                    black_box(scheduler.stats())
                });
            },
        );
    }
    group.finish();
}

/// Repeated interim triggers for a busy session collapse into one slot.
fn interim_coalescing(c: &mut Criterion) {
    let snapshot = snapshot();
    c.bench_function("interim_coalescing_1000", |b| {
        b.iter(|| {
            let scheduler = PriorityScheduler::new();
            for sequence in 0..1000 {
                black_box(scheduler.enqueue(request(JobClass::Interim, 1, sequence, &snapshot)));
            }
            black_box(scheduler.depths())
        });
    });
}

criterion_group!(benches, enqueue_and_drain, interim_coalescing);
criterion_main!(benches);
