//! Inbound command messages and the queue that carries them.
//!
//! The reactor is the sole producer per connection; the embedding
//! application owns the consumer side and drains it from its own worker
//! threads.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use torii_codec::ReadOnlyPacket;

use crate::connection::Connection;

/// One decrypted command lifted out of a frame.
///
/// The `data` view shares ownership of the decrypted frame, so command
/// bytes are never copied; the frame stays alive until the last message
/// referencing it is dropped.
pub struct Message {
    connection: Arc<Connection>,
    command_code: u16,
    data: ReadOnlyPacket,
}

impl Message {
    pub(crate) fn new(connection: Arc<Connection>, command_code: u16, data: ReadOnlyPacket) -> Self {
        Self {
            connection,
            command_code,
            data,
        }
    }

    /// The connection the command arrived on.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The 16-bit command code.
    #[must_use]
    pub fn command_code(&self) -> u16 {
        self.command_code
    }

    /// The command body, positioned at its first byte.
    #[must_use]
    pub fn data(&self) -> &ReadOnlyPacket {
        &self.data
    }

    /// Take the command body out of the message.
    #[must_use]
    pub fn into_data(self) -> ReadOnlyPacket {
        self.data
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("command_code", &format_args!("0x{:04X}", self.command_code))
            .field("size", &self.data.size())
            .finish_non_exhaustive()
    }
}

/// A blocking multi-producer FIFO with wake-on-empty semantics.
///
/// [`dequeue`](Self::dequeue) and [`dequeue_all`](Self::dequeue_all) park
/// the calling thread while the queue is empty and wake on the next
/// enqueue.
pub struct MessageQueue<T> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> MessageQueue<T> {
    /// A new, empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Append one item, waking a blocked consumer if the queue was empty.
    pub fn enqueue(&self, item: T) {
        let was_empty = {
            let mut queue = self.queue.lock();
            let was_empty = queue.is_empty();
            queue.push_back(item);
            was_empty
        };

        if was_empty {
            self.ready.notify_one();
        }
    }

    /// Splice all of `items` onto the tail, waking a blocked consumer if
    /// the queue was empty.
    pub fn enqueue_all(&self, items: &mut VecDeque<T>) {
        if items.is_empty() {
            return;
        }

        let was_empty = {
            let mut queue = self.queue.lock();
            let was_empty = queue.is_empty();
            queue.append(items);
            was_empty
        };

        if was_empty {
            self.ready.notify_one();
        }
    }

    /// Remove and return the head, blocking while the queue is empty.
    pub fn dequeue(&self) -> T {
        let mut queue = self.queue.lock();

        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }

            self.ready.wait(&mut queue);
        }
    }

    /// Remove and return the head if one is ready.
    pub fn try_dequeue(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Drain everything onto the tail of `destination`, blocking while
    /// the queue is empty.
    pub fn dequeue_all(&self, destination: &mut VecDeque<T>) {
        let mut queue = self.queue.lock();

        while queue.is_empty() {
            self.ready.wait(&mut queue);
        }

        destination.append(&mut queue);
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = MessageQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.dequeue(), 1);
        assert_eq!(queue.dequeue(), 2);
        assert_eq!(queue.try_dequeue(), Some(3));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn dequeue_blocks_until_an_enqueue_arrives() {
        let queue = Arc::new(MessageQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());

        queue.enqueue(42);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn dequeue_all_drains_in_one_call() {
        let queue = Arc::new(MessageQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut drained = VecDeque::new();
                queue.dequeue_all(&mut drained);
                drained
            })
        };

        let mut batch: VecDeque<i32> = (0..5).collect();
        thread::sleep(Duration::from_millis(20));
        queue.enqueue_all(&mut batch);

        let drained = consumer.join().unwrap();
        assert_eq!(drained, (0..5).collect::<VecDeque<i32>>());
        assert!(batch.is_empty());
    }
}
