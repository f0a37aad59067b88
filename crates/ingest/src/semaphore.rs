/// Counting semaphore used to cap how many device files are open at once.
use parking_lot::{Condvar, Mutex};

pub struct Semaphore {
    available: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    /// Blocks until a permit is free. The permit is returned when the guard
    /// drops.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit { sem: self }
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

pub struct Permit<'a> {
    sem: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.sem.available.lock() += 1;
        self.sem.released.notify_one();
    }
}
