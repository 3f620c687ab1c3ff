//! Multi-rotor substitution machine.
//!
//! Compiled scripts are obscured with a classic rotor cipher: a chain of
//! byte permutations whose positions step like an odometer after every
//! byte. The wiring is derived from a key string through a small
//! Wichmann-Hill generator, so the same key always builds the same machine.

const ROTOR_SIZE: usize = 256;

/// Default number of rotors in the chain.
pub const DEFAULT_ROTORS: usize = 6;

/// A keyed rotor machine.
///
/// The wiring is computed once in [`Rotor::new`]; each call to
/// [`encrypt`](Rotor::encrypt) or [`decrypt`](Rotor::decrypt) starts from
/// the initial rotor positions, so calls are independent of each other and
/// a `Rotor` can be shared between threads.
#[derive(Clone)]
pub struct Rotor {
    positions: Vec<u8>,
    advances: Vec<u8>,
    forward: Vec<[u8; ROTOR_SIZE]>,
    reverse: Vec<[u8; ROTOR_SIZE]>,
}

impl std::fmt::Debug for Rotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rotor")
            .field("rotors", &self.positions.len())
            .finish_non_exhaustive()
    }
}

impl Rotor {
    /// Build a six-rotor machine from a key.
    pub fn new(key: &[u8]) -> Self {
        Self::with_rotors(key, DEFAULT_ROTORS)
    }

    /// Build a machine with `count` rotors.
    pub fn with_rotors(key: &[u8], count: usize) -> Self {
        let mut rng = Seed::from_key(key);

        let mut positions = Vec::with_capacity(count);
        let mut advances = Vec::with_capacity(count);
        let mut forward = Vec::with_capacity(count);
        let mut reverse = Vec::with_capacity(count);

        for _ in 0..count {
            positions.push(rng.below(256) as u8);
            advances.push((1 + 2 * rng.below(128)) as u8);

            let (e, d) = rng.permutation();
            forward.push(e);
            reverse.push(d);
        }

        Self {
            positions,
            advances,
            forward,
            reverse,
        }
    }

    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.encrypt_in_place(&mut out);
        out
    }

    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.decrypt_in_place(&mut out);
        out
    }

    pub fn encrypt_in_place(&self, data: &mut [u8]) {
        let mut positions = self.positions.clone();
        for byte in data {
            let mut c = *byte;
            for (table, &pos) in self.forward.iter().zip(&positions) {
                c = table[(pos ^ c) as usize];
            }
            *byte = c;
            self.step(&mut positions);
        }
    }

    pub fn decrypt_in_place(&self, data: &mut [u8]) {
        let mut positions = self.positions.clone();
        for byte in data {
            let mut c = *byte;
            for (table, &pos) in self.reverse.iter().zip(&positions).rev() {
                c = pos ^ table[c as usize];
            }
            *byte = c;
            self.step(&mut positions);
        }
    }

    /// Advance every rotor, carrying into the next one on wrap-around.
    #[inline]
    fn step(&self, positions: &mut [u8]) {
        let last = positions.len().saturating_sub(1);
        for i in 0..positions.len() {
            let next = positions[i] as u32 + self.advances[i] as u32;
            positions[i] = (next % ROTOR_SIZE as u32) as u8;
            if next >= ROTOR_SIZE as u32 && i < last {
                positions[i + 1] = positions[i + 1].wrapping_add(1);
            }
        }
    }
}

/// Three-part Wichmann-Hill generator state.
struct Seed([i32; 3]);

impl Seed {
    fn from_key(key: &[u8]) -> Self {
        let (mut k1, mut k2, mut k3) = (995u32, 576u32, 767u32);
        for &c in key {
            let c = c as u32;
            k1 = ((k1 << 3 | k1 >> 13).wrapping_add(c)) & 0xFFFF;
            k2 = ((k2 << 3 | k2 >> 13) ^ c) & 0xFFFF;
            k3 = ((k3 << 3 | k3 >> 13).wrapping_sub(c)) & 0xFFFF;
        }

        // Seeds are signed 16-bit values.
        let signed = |k: u32| k as u16 as i16 as i32;
        Self([signed(k1), signed(k2 | 1), signed(k3)])
    }

    /// Next value in `[0, 1)`.
    fn next(&mut self) -> f64 {
        let [x, y, z] = self.0;

        // Integer division and remainder truncate toward zero.
        let mut x = 171 * (x % 177) - 2 * (x / 177);
        let mut y = 172 * (y % 176) - 35 * (y / 176);
        let mut z = 170 * (z % 178) - 63 * (z / 178);
        if x < 0 {
            x += 30269;
        }
        if y < 0 {
            y += 30307;
        }
        if z < 0 {
            z += 30323;
        }
        self.0 = [x, y, z];

        let term = x as f64 / 30269.0 + y as f64 / 30307.0 + z as f64 / 30323.0;
        let value = term - term.floor();
        if value >= 1.0 {
            0.0
        } else {
            value
        }
    }

    /// Next integer in `[0, bound)`.
    fn below(&mut self, bound: i32) -> i32 {
        ((self.next() * bound as f64) as i32) % bound
    }

    /// Shuffle the identity into a forward table and build its inverse.
    fn permutation(&mut self) -> ([u8; ROTOR_SIZE], [u8; ROTOR_SIZE]) {
        let mut forward = [0u8; ROTOR_SIZE];
        let mut reverse = [0u8; ROTOR_SIZE];
        for (i, slot) in forward.iter_mut().enumerate() {
            *slot = i as u8;
        }

        let mut k = ROTOR_SIZE;
        while k >= 2 {
            let q = self.below(k as i32) as usize;
            k -= 1;
            forward.swap(q, k);
            reverse[forward[k] as usize] = k as u8;
        }
        reverse[forward[0] as usize] = 0;

        (forward, reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyDatabase;

    fn engine_rotor() -> Rotor {
        let key = KeyDatabase::builtin().get("neox").unwrap().rotor_key().unwrap();
        Rotor::new(key.as_bytes())
    }

    #[test]
    fn test_seed_from_engine_key() {
        let key = KeyDatabase::builtin().get("neox").unwrap().rotor_key().unwrap();
        assert_eq!(Seed::from_key(key.as_bytes()).0, [5816, -8351, 383]);
    }

    #[test]
    fn test_known_ciphertext() {
        let rotor = engine_rotor();
        let ciphertext = rotor.encrypt(b"hello rotor world");
        assert_eq!(hex::encode(&ciphertext), "b605ecf18fff89c34581b4121dca871242");
        assert_eq!(rotor.decrypt(&ciphertext), b"hello rotor world");
    }

    #[test]
    fn test_short_key() {
        let rotor = Rotor::new(b"test key");
        assert_eq!(hex::encode(rotor.encrypt(b"abcdefgh")), "6b8c5958110ac26e");
    }

    #[test]
    fn test_tables_are_inverse_permutations() {
        let rotor = engine_rotor();
        for (e, d) in rotor.forward.iter().zip(&rotor.reverse) {
            for i in 0..ROTOR_SIZE {
                assert_eq!(d[e[i] as usize] as usize, i);
            }
        }
        assert!(rotor.advances.iter().all(|a| a % 2 == 1));
    }

    #[test]
    fn test_calls_are_independent() {
        let rotor = Rotor::new(b"k");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let first = rotor.encrypt(&data);
        let second = rotor.encrypt(&data);
        assert_eq!(first, second);
        assert_eq!(rotor.decrypt(&first), data);
    }
}
