//! `disk_reservation_get` (§4.5): a capacity counter protected by one
//! lock, decremented up front so a write can know it won't run out of
//! space partway through, refunded automatically unless the reservation
//! is explicitly committed.

use cowfs_types::{Error, Result};
use parking_lot::Mutex;

pub struct ReservationPool {
    free_sectors: Mutex<u64>,
}

impl ReservationPool {
    pub fn new(total_sectors: u64) -> Self {
        Self { free_sectors: Mutex::new(total_sectors) }
    }

    pub fn free_sectors(&self) -> u64 {
        *self.free_sectors.lock()
    }

    /// Reserves `sectors * replicas` worth of space. Returns a guard
    /// that refunds the reservation on drop unless
    /// [`DiskReservation::commit`] is called first.
    pub fn get(&self, sectors: u64, replicas: u8) -> Result<DiskReservation<'_>> {
        let needed = sectors.saturating_mul(replicas as u64);
        let mut free = self.free_sectors.lock();
        if *free < needed {
            return Err(Error::NoSpace);
        }
        *free -= needed;
        Ok(DiskReservation { pool: self, sectors: needed, committed: false })
    }

    fn refund(&self, sectors: u64) {
        *self.free_sectors.lock() += sectors;
    }
}

/// A live reservation against a [`ReservationPool`]. Dropping it without
/// calling [`DiskReservation::commit`] — the failed-write or
/// cancelled-write case §4.5 names — gives the sectors back.
pub struct DiskReservation<'a> {
    pool: &'a ReservationPool,
    sectors: u64,
    committed: bool,
}

impl DiskReservation<'_> {
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    /// The write succeeded and actually consumed the reserved space;
    /// the sectors stay charged against the pool.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for DiskReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.refund(self.sectors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_decrements_and_refunds_on_drop() {
        let pool = ReservationPool::new(100);
        {
            let res = pool.get(10, 2).unwrap();
            assert_eq!(res.sectors(), 20);
            assert_eq!(pool.free_sectors(), 80);
        }
        assert_eq!(pool.free_sectors(), 100);
    }

    #[test]
    fn committed_reservation_stays_charged() {
        let pool = ReservationPool::new(100);
        let res = pool.get(10, 1).unwrap();
        res.commit();
        assert_eq!(pool.free_sectors(), 90);
    }

    #[test]
    fn over_capacity_reservation_fails() {
        let pool = ReservationPool::new(10);
        assert!(matches!(pool.get(10, 2), Err(Error::NoSpace)));
        assert_eq!(pool.free_sectors(), 10);
    }
}
