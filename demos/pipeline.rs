use spindle::{
    ConsumerBarrier, EventSequencer, ProducerType, RingBufferEventSequencer, SleepingWaitStrategy,
    WaitError,
};
use std::sync::Arc;
use tokio::{join, task};

#[derive(Debug, Default)]
struct Order {
    id: i64,
    price: u64,
    journaled: bool,
}

const ORDERS: i64 = 64;

#[tokio::main]
async fn main() {
    let sequencer = Arc::new(
        RingBufferEventSequencer::<Order>::builder(Order::default)
            .capacity(8)
            .producer_type(ProducerType::Multi)
            .wait_strategy(SleepingWaitStrategy::default())
            .build(),
    );

    // journal -> pricing; only the last stage gates the producers
    let journal = sequencer.new_single_consumer_barrier(&[]);
    let pricing =
        sequencer.new_single_consumer_barrier(&[journal.clone() as Arc<dyn ConsumerBarrier>]);
    sequencer.add_gating_barriers(&[&*pricing]);

    let journal_task = {
        let sequencer = sequencer.clone();
        let journal = journal.clone();
        task::spawn_blocking(move || {
            while journal.sequence() < ORDERS - 1 {
                let batch = sequencer.batch(&journal).unwrap();
                for sequence in batch.first_sequence()..=batch.last_sequence() {
                    // Stage A owns the batch until it drops, so it may mark events in place
                    let order = unsafe { sequencer.producer_get(sequence) };
                    order.journaled = true;
                }
            }
        })
    };

    let pricing_task = {
        let sequencer = sequencer.clone();
        let pricing = pricing.clone();
        task::spawn_blocking(move || {
            let mut total = 0;
            loop {
                match sequencer.batch(&pricing) {
                    Ok(batch) => {
                        for (_, order) in batch.iter() {
                            assert!(order.journaled);
                            println!("priced order {}: {}", order.id, order.price);
                            total += order.price;
                        }
                    }
                    Err(WaitError::Alerted) => return total,
                    Err(error) => panic!("{error}"),
                }
            }
        })
    };

    let producers: Vec<_> = (0..2)
        .map(|producer| {
            let sequencer = sequencer.clone();
            task::spawn_blocking(move || {
                for _ in 0..ORDERS / 2 {
                    sequencer.publish_event(|order, sequence| {
                        order.id = sequence;
                        order.price = 100 + producer;
                        order.journaled = false;
                    });
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }
    let _ = journal_task.await;
    while pricing.sequence() < ORDERS - 1 {
        task::yield_now().await;
    }
    pricing.alert();

    let (total,) = join!(pricing_task);
    println!("total: {}", total.unwrap());
}
