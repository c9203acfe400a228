use spindle::{ConsumerBarrier, EventSequencer, UnboundedEventSequencer, WaitError, YieldingWaitStrategy};
use std::sync::Arc;
use tokio::{join, task};

#[tokio::main]
async fn main() {
    let sequencer = Arc::new(
        UnboundedEventSequencer::<String>::builder(String::new)
            .chunk_size(16)
            .max_pooled_chunks(2)
            .wait_strategy(YieldingWaitStrategy::default())
            .build(),
    );
    let consumer = sequencer.new_single_consumer_barrier(&[]);
    sequencer.add_gating_barriers(&[&*consumer]);

    let consumer_task = {
        let sequencer = sequencer.clone();
        let consumer = consumer.clone();
        task::spawn_blocking(move || {
            let mut received = 0usize;
            loop {
                match sequencer.batch(&consumer) {
                    Ok(batch) => received += batch.len(),
                    Err(WaitError::Alerted) => return received,
                    Err(error) => panic!("{error}"),
                }
            }
        })
    };

    let producer_task = {
        let sequencer = sequencer.clone();
        task::spawn_blocking(move || {
            for i in 0..1000 {
                // Never waits: the buffer grows while the consumer lags
                sequencer.publish_event(|slot, _| {
                    slot.clear();
                    slot.push_str("message ");
                    slot.push_str(&i.to_string());
                });
            }
        })
    };

    let _ = producer_task.await;
    while consumer.progress().get_volatile() < 999 {
        task::yield_now().await;
    }
    sequencer.try_reclaim();
    println!(
        "live chunks: {}, pooled: {}",
        sequencer.live_chunk_count(),
        sequencer.pooled_chunk_count()
    );

    consumer.alert();
    let (received,) = join!(consumer_task);
    println!("received: {}", received.unwrap());
}
