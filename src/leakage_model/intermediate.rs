/// Computes the attacked intermediate value from one text byte and one key byte guess.
pub trait Intermediate: Send + Sync {
    fn intermediate(&self, value: u8, guess: u8) -> u8;
}

impl<F> Intermediate for F
where
    F: Fn(u8, u8) -> u8 + Send + Sync,
{
    fn intermediate(&self, value: u8, guess: u8) -> u8 {
        self(value, guess)
    }
}

/// Final key addition of a cipher whose last round XORs the state with the round key.
///
/// Given a ciphertext byte, the state byte before the key addition is `ciphertext ^ key`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastRoundXor;

impl Intermediate for LastRoundXor {
    #[inline]
    fn intermediate(&self, value: u8, guess: u8) -> u8 {
        value ^ guess
    }
}
