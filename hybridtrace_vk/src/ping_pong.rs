/// Two history slots of a resource. With parity `p`, passes read `slots[p]`
/// (last frame's output) and write `slots[p ^ 1]`.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { slots: [first, second] }
    }

    pub fn from_fn(mut f: impl FnMut(usize) -> T) -> Self {
        Self { slots: [f(0), f(1)] }
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self { slots: [f(0)?, f(1)?] })
    }

    pub fn read(&self, parity: usize) -> &T {
        &self.slots[parity & 1]
    }

    pub fn write(&self, parity: usize) -> &T {
        &self.slots[(parity & 1) ^ 1]
    }

    pub fn slot(&self, index: usize) -> &T {
        &self.slots[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PingPong<U> {
        PingPong { slots: [f(&self.slots[0]), f(&self.slots[1])] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_write_slots_never_alias() {
        let pair = PingPong::from_fn(|i| i * 10);
        for parity in 0..4 {
            assert_ne!(pair.read(parity), pair.write(parity));
        }
        assert_eq!(*pair.read(0), 0);
        assert_eq!(*pair.write(0), 10);
        assert_eq!(*pair.read(1), 10);
        assert_eq!(*pair.write(1), 0);
    }

    #[test]
    fn written_slot_becomes_next_frames_history() {
        let pair = PingPong::new("a", "b");
        let mut parity = 0;
        for _ in 0..5 {
            let written = *pair.write(parity);
            parity ^= 1;
            assert_eq!(*pair.read(parity), written);
        }
    }

    #[test]
    fn try_from_fn_stops_at_first_error() {
        let mut calls = 0;
        let result: Result<PingPong<u32>, &str> = PingPong::try_from_fn(|i| {
            calls += 1;
            if i == 0 {
                Err("boom")
            } else {
                Ok(1)
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
