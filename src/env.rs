use crate::matrix::Matrix;

/// Contract between the trainer and whatever world it learns in.
///
/// Observations are column vectors of `observation_dimension()` rows; actions
/// are column vectors of `action_dimension()` rows. `get_state` must stay
/// valid until the next `update`/`reset` call. `render` is diagnostic only.
pub trait Environment {
    fn players(&self) -> &[String];

    fn observation_dimension(&self) -> usize;
    fn action_dimension(&self) -> usize;

    /// Prepare resources. Must be called before the first `reset`.
    fn initialize(&mut self);
    /// True once `initialize` has run and `close` has not.
    fn is_initialized(&self) -> bool;
    /// Release resources.
    fn close(&mut self);

    /// Put the environment back into a start state. Expects the environment
    /// to be initialized.
    fn reset(&mut self);
    /// True when the current episode has terminated.
    fn is_finished(&self) -> bool;

    /// Advance the simulation by `delta_time` seconds using the most recently
    /// set actions.
    fn update(&mut self, delta_time: f32);

    fn get_state(&self, player_id: &str) -> &Matrix;
    fn set_action(&mut self, player_id: &str, action: &Matrix);
    fn get_reward(&self, player_id: &str) -> f32;

    /// Print or draw the current state for a human.
    fn render(&self);
}
