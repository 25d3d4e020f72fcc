use std::io::{Read, Write};

use rand::rngs::StdRng;

use crate::activations::{Activation, Loss};
use crate::matrix::Matrix;
use crate::utils::init_from_num_inputs;

pub const ADAM_BETA1: f32 = 0.9;
pub const ADAM_BETA2: f32 = 0.999;
pub const ADAM_EPSILON: f32 = 1.0e-7;

/// One fully-connected layer.
///
/// The layer caches its last outputs and gradients (shaped outputs x batch)
/// between the forward pass and the parameter update. It does NOT keep a
/// reference to its input batch: the caller passes the same input buffer into
/// `sgd_step`/`adam_step`, which keeps every borrow local to a single call.
pub struct Layer {
    input_count: usize,
    output_count: usize,
    batch_size: usize,
    weights: Matrix,
    biases: Matrix,
    outputs: Matrix,
    gradients: Matrix,
    activation: Activation,

    // Adam first/second-moment accumulators, shaped like weights/biases.
    m_weights: Matrix,
    v_weights: Matrix,
    m_biases: Matrix,
    v_biases: Matrix,
}

impl Layer {
    /// Creates a layer with randomly initialized weights and biases.
    pub fn new(
        num_inputs: usize,
        num_outputs: usize,
        activation: Activation,
        rng: &mut StdRng,
    ) -> Self {
        let mut weights = Matrix::zeros(num_outputs, num_inputs);
        let mut biases = Matrix::zeros(num_outputs, 1);

        for i in 0..num_outputs {
            *biases.at_mut(i, 0) = init_from_num_inputs(num_inputs, rng);
            for j in 0..num_inputs {
                *weights.at_mut(i, j) = init_from_num_inputs(num_inputs, rng);
            }
        }

        Self {
            input_count: num_inputs,
            output_count: num_outputs,
            batch_size: 1,
            weights,
            biases,
            outputs: Matrix::zeros(num_outputs, 1),
            gradients: Matrix::zeros(num_outputs, 1),
            activation,
            m_weights: Matrix::zeros(num_outputs, num_inputs),
            v_weights: Matrix::zeros(num_outputs, num_inputs),
            m_biases: Matrix::zeros(num_outputs, 1),
            v_biases: Matrix::zeros(num_outputs, 1),
        }
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn outputs(&self) -> &Matrix {
        &self.outputs
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn biases(&self) -> &Matrix {
        &self.biases
    }

    pub fn gradients(&self) -> &Matrix {
        &self.gradients
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Forward pass: `outputs = act(weights * inputs + biases)`, broadcasting
    /// the biases across the batch columns.
    pub fn forward(&mut self, inputs: &Matrix) {
        debug_assert!(
            inputs.rows() == self.input_count,
            "invalid input size for layer"
        );

        self.batch_size = inputs.cols();

        let mut out = &self.weights * inputs;
        out.add_to_columns(&self.biases);
        let act = self.activation;
        out.apply_to_elements(|v| act.apply(v));
        self.outputs = out;
    }

    /// Terminal-layer gradient from a loss derivative against direct targets.
    pub fn output_gradients_from_loss(&mut self, expected_outputs: &Matrix, loss: Loss) {
        debug_assert!(
            expected_outputs.rows() == self.output_count
                && expected_outputs.cols() == self.batch_size,
            "invalid expected output size for layer"
        );

        let mut gradients = Matrix::zeros(self.output_count, self.batch_size);
        for i in 0..gradients.size() {
            let out = self.outputs.get(i);
            let grad = loss.derivative(out, expected_outputs.get(i))
                * self.activation.derivative_from_output(out);
            gradients.data_mut()[i] = grad;
        }
        self.gradients = gradients;
    }

    /// Seeds the terminal gradient directly with an externally computed
    /// upstream gradient. This is the hook the policy trainer uses, since its
    /// objective is not a per-output loss. The gradient is taken verbatim, so
    /// the layer is expected to carry the Identity activation (derivative 1).
    pub fn set_output_gradients(&mut self, gradients: Matrix) {
        debug_assert!(
            gradients.rows() == self.output_count && gradients.cols() == self.batch_size,
            "invalid external gradient size for layer"
        );
        self.gradients = gradients;
    }

    /// Backpropagates through this layer:
    /// `gradients = next.weights^T * next.gradients (.) act'(outputs)`.
    /// The next layer must already hold its gradients for this step.
    pub fn backprop_gradients(&mut self, next_layer: &Layer) {
        let propagated = &next_layer.weights.transpose() * &next_layer.gradients;

        let mut activation_derivatives = self.outputs.clone();
        let act = self.activation;
        activation_derivatives.apply_to_elements(|y| act.derivative_from_output(y));

        self.gradients = propagated.mult_elementwise(&activation_derivatives);
    }

    /// Plain gradient descent. `inputs` must be the batch the last forward
    /// pass ran on.
    pub fn sgd_step(&mut self, inputs: &Matrix, learning_rate: f32) {
        let weight_grads = &self.gradients * &inputs.transpose();
        let bias_grads = self.gradients.sum_rows();

        self.weights = &self.weights - &(&weight_grads * learning_rate);
        self.biases = &self.biases - &(&bias_grads * learning_rate);
    }

    /// Adam update. `timestep` counts parameter updates, starts at 1 and must
    /// grow monotonically across the whole training run or the bias
    /// correction term is wrong.
    pub fn adam_step(
        &mut self,
        inputs: &Matrix,
        learning_rate: f32,
        timestep: usize,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) {
        debug_assert!(timestep >= 1, "Adam timestep starts at 1");

        let weight_grads = &self.gradients * &inputs.transpose();
        let bias_grads = self.gradients.sum_rows();

        let correction1 = 1.0 - beta1.powi(timestep as i32);
        let correction2 = 1.0 - beta2.powi(timestep as i32);

        Self::adam_update_params(
            self.weights.data_mut(),
            self.m_weights.data_mut(),
            self.v_weights.data_mut(),
            weight_grads.data(),
            learning_rate,
            beta1,
            beta2,
            epsilon,
            correction1,
            correction2,
        );
        Self::adam_update_params(
            self.biases.data_mut(),
            self.m_biases.data_mut(),
            self.v_biases.data_mut(),
            bias_grads.data(),
            learning_rate,
            beta1,
            beta2,
            epsilon,
            correction1,
            correction2,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn adam_update_params(
        params: &mut [f32],
        m: &mut [f32],
        v: &mut [f32],
        grads: &[f32],
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        correction1: f32,
        correction2: f32,
    ) {
        for i in 0..params.len() {
            let g = grads[i];
            m[i] = beta1 * m[i] + (1.0 - beta1) * g;
            v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;

            let m_hat = m[i] / correction1;
            let v_hat = v[i] / correction2;

            params[i] -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        }
    }

    /// Binary layout: `[input_count: u64][output_count: u64][weights][biases]`.
    /// The activation tag is intentionally not persisted; `load` must be
    /// given the same activation the layer was saved with.
    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&(self.input_count as u64).to_le_bytes())?;
        out.write_all(&(self.output_count as u64).to_le_bytes())?;
        self.weights.save(out)?;
        self.biases.save(out)?;
        Ok(())
    }

    /// Reads a layer written by `save`. The caller supplies the activation;
    /// passing a different one than at save time silently changes behavior
    /// (documented precondition, not detectable from the file).
    pub fn load<R: Read>(input: &mut R, activation: Activation) -> std::io::Result<Layer> {
        let mut word = [0u8; 8];
        input.read_exact(&mut word)?;
        let input_count = u64::from_le_bytes(word) as usize;
        input.read_exact(&mut word)?;
        let output_count = u64::from_le_bytes(word) as usize;

        let weights = Matrix::load(input)?;
        let biases = Matrix::load(input)?;

        Ok(Layer {
            input_count,
            output_count,
            batch_size: 1,
            weights,
            biases,
            outputs: Matrix::zeros(output_count, 1),
            gradients: Matrix::zeros(output_count, 1),
            activation,
            m_weights: Matrix::zeros(output_count, input_count),
            v_weights: Matrix::zeros(output_count, input_count),
            m_biases: Matrix::zeros(output_count, 1),
            v_biases: Matrix::zeros(output_count, 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn forward_applies_weights_biases_and_batch() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = Layer::new(2, 2, Activation::Identity, &mut rng);
        layer.weights = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 2.0]]).unwrap();
        layer.biases = Matrix::column_vector(&[0.5, -1.0]);

        let batch = Matrix::from_rows(&[vec![1.0, 3.0], vec![2.0, 4.0]]).unwrap();
        layer.forward(&batch);

        assert_eq!(layer.batch_size(), 2);
        assert_eq!(layer.outputs().at(0, 0), 1.5);
        assert_eq!(layer.outputs().at(1, 0), 3.0);
        assert_eq!(layer.outputs().at(0, 1), 3.5);
        assert_eq!(layer.outputs().at(1, 1), 7.0);
    }

    #[test]
    fn forward_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut layer = Layer::new(3, 4, Activation::LeakyRelu, &mut rng);
        let input = Matrix::column_vector(&[0.2, -0.4, 0.9]);

        layer.forward(&input);
        let first = layer.outputs().clone();
        layer.forward(&input);
        assert_eq!(first, *layer.outputs());
    }

    #[test]
    fn sgd_step_moves_against_the_gradient() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Layer::new(1, 1, Activation::Identity, &mut rng);
        layer.weights = Matrix::from_rows(&[vec![1.0]]).unwrap();
        layer.biases = Matrix::column_vector(&[0.0]);

        let input = Matrix::column_vector(&[2.0]);
        layer.forward(&input);
        // Pretend the upstream gradient is 1: weight grad = 1 * 2, bias grad = 1.
        layer.set_output_gradients(Matrix::from_rows(&[vec![1.0]]).unwrap());
        layer.sgd_step(&input, 0.1);

        assert!((layer.weights().at(0, 0) - 0.8).abs() < 1e-6);
        assert!((layer.biases().at(0, 0) - (-0.1)).abs() < 1e-6);
    }

    #[test]
    fn adam_first_step_moves_by_roughly_the_learning_rate() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Layer::new(1, 1, Activation::Identity, &mut rng);
        layer.weights = Matrix::from_rows(&[vec![1.0]]).unwrap();
        layer.biases = Matrix::column_vector(&[0.0]);

        let input = Matrix::column_vector(&[1.0]);
        layer.forward(&input);
        layer.set_output_gradients(Matrix::from_rows(&[vec![0.5]]).unwrap());
        layer.adam_step(&input, 0.01, 1, ADAM_BETA1, ADAM_BETA2, ADAM_EPSILON);

        // With bias correction at t=1, m_hat = v_hat^(1/2) = |g|, so the step
        // is lr * sign(g) up to epsilon.
        assert!((layer.weights().at(0, 0) - (1.0 - 0.01)).abs() < 1e-4);
    }

    #[test]
    fn backprop_chains_through_next_layer_weights() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut hidden = Layer::new(1, 2, Activation::Identity, &mut rng);
        let mut output = Layer::new(2, 1, Activation::Identity, &mut rng);
        output.weights = Matrix::from_rows(&[vec![3.0, -1.0]]).unwrap();
        output.biases = Matrix::column_vector(&[0.0]);

        let input = Matrix::column_vector(&[1.0]);
        hidden.forward(&input);
        output.forward(hidden.outputs());
        output.set_output_gradients(Matrix::from_rows(&[vec![2.0]]).unwrap());
        hidden.backprop_gradients(&output);

        // grad = W^T * g = [3, -1]^T * 2
        assert_eq!(hidden.gradients().at(0, 0), 6.0);
        assert_eq!(hidden.gradients().at(1, 0), -2.0);
    }

    #[test]
    fn save_load_round_trips_parameters() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = Layer::new(3, 2, Activation::Sigmoid, &mut rng);

        let mut buf: Vec<u8> = Vec::new();
        layer.save(&mut buf).unwrap();
        let mut loaded = Layer::load(&mut buf.as_slice(), Activation::Sigmoid).unwrap();

        assert_eq!(loaded.input_count(), 3);
        assert_eq!(loaded.output_count(), 2);
        assert_eq!(layer.weights(), loaded.weights());
        assert_eq!(layer.biases(), loaded.biases());

        let input = Matrix::column_vector(&[0.1, 0.2, 0.3]);
        layer.forward(&input);
        loaded.forward(&input);
        assert_eq!(layer.outputs(), loaded.outputs());
    }
}
