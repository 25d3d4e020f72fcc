/// Activation functions as a closed set of tags instead of bare function
/// pointers, so a layer can be matched against the functions it was saved
/// with. The derivatives are expressed in terms of the neuron OUTPUT, not the
/// pre-activation, which is why sigmoid' and leaky-ReLU' take `y` below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Sigmoid,
    LeakyRelu,
    Identity,
}

impl Activation {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
            Activation::Identity => x,
        }
    }

    /// Derivative computed from the activation output `y = apply(x)`.
    pub fn derivative_from_output(self, y: f32) -> f32 {
        match self {
            Activation::Sigmoid => y * (1.0 - y),
            Activation::LeakyRelu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
            Activation::Identity => 1.0,
        }
    }
}

/// Loss functions paired with their derivatives with respect to the
/// activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loss {
    SquareError,
}

impl Loss {
    pub fn apply(self, activation: f32, expected: f32) -> f32 {
        match self {
            Loss::SquareError => {
                let error = activation - expected;
                error * error
            }
        }
    }

    pub fn derivative(self, activation: f32, expected: f32) -> f32 {
        match self {
            Loss::SquareError => 2.0 * (activation - expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_centered_and_bounded() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
        assert!(Activation::Sigmoid.apply(20.0) > 0.999);
        assert!(Activation::Sigmoid.apply(-20.0) < 0.001);
    }

    #[test]
    fn sigmoid_derivative_uses_the_output() {
        let y = Activation::Sigmoid.apply(0.7);
        assert!((Activation::Sigmoid.derivative_from_output(y) - y * (1.0 - y)).abs() < 1e-7);
    }

    #[test]
    fn leaky_relu_keeps_a_small_negative_slope() {
        assert_eq!(Activation::LeakyRelu.apply(3.0), 3.0);
        assert!((Activation::LeakyRelu.apply(-2.0) - (-0.02)).abs() < 1e-7);
        assert_eq!(Activation::LeakyRelu.derivative_from_output(1.5), 1.0);
        assert_eq!(Activation::LeakyRelu.derivative_from_output(-0.5), 0.01);
    }

    #[test]
    fn square_error_and_derivative_agree() {
        assert_eq!(Loss::SquareError.apply(3.0, 1.0), 4.0);
        assert_eq!(Loss::SquareError.derivative(3.0, 1.0), 4.0);
        assert_eq!(Loss::SquareError.derivative(1.0, 3.0), -4.0);
    }
}
